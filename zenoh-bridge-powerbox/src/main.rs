//! Zenoh bridge for a Modbus ventilation unit.
//!
//! Relays write commands from Zenoh to the device and publishes polled
//! register values back to Zenoh.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use powerbox_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
use tokio::sync::mpsc;
use tracing::info;
use zenoh_bridge_powerbox::bridge::Bridge;
use zenoh_bridge_powerbox::bus::CommandSubscription;
use zenoh_bridge_powerbox::config::{Overrides, PowerboxBridgeConfig};
use zenoh_bridge_powerbox::device::{FieldDevice, ModbusDevice};

/// Inbound commands buffered between the subscribers and ingestion.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Zenoh bridge for a Modbus ventilation unit.
#[derive(Parser, Debug)]
#[command(name = "zenoh-bridge-powerbox")]
#[command(about = "Relays commands and telemetry between Zenoh and a Modbus ventilation unit")]
#[command(version)]
struct Args {
    #[command(flatten)]
    bridge: BridgeArgs,

    /// Key prefix for command and telemetry topics.
    #[arg(long)]
    key_prefix: Option<String>,

    /// Modbus TCP host of the device.
    #[arg(long)]
    device_host: Option<String>,

    /// Modbus TCP port of the device.
    #[arg(long)]
    device_port: Option<u16>,

    /// Modbus unit (slave) id.
    #[arg(long)]
    unit_id: Option<u8>,

    /// Zenoh endpoint to connect to (repeatable).
    #[arg(long)]
    connect: Vec<String>,

    /// Zenoh user name.
    #[arg(long)]
    username: Option<String>,

    /// Zenoh password.
    #[arg(long)]
    password: Option<String>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            key_prefix: self.key_prefix.clone(),
            device_host: self.device_host.clone(),
            device_port: self.device_port,
            unit_id: self.unit_id,
            connect: self.connect.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = PowerboxBridgeConfig::load_or_default(args.bridge.config.as_deref())
        .with_context(|| format!("Failed to load config from {:?}", args.bridge.config))?;
    config.apply_overrides(&args.overrides());
    config.validate().context("Invalid configuration")?;

    let pb = &config.powerbox;
    // Drain plus one in-flight transaction, with some margin.
    let shutdown_timeout =
        pb.queue.drain_timeout() + pb.device.transaction_timeout() + Duration::from_secs(2);
    let bridge_config = config.clone();

    let mut runner = BridgeRunner::new_with_args("powerbox", config, Some(&args.bridge))
        .await
        .context("Failed to start bridge")?
        .with_status_publishing()
        .with_shutdown_timeout(shutdown_timeout);

    let device = ModbusDevice::new(&bridge_config.powerbox.device);
    let bridge = Bridge::new(&bridge_config, device.clone(), runner.publisher());

    let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let subscription =
        match CommandSubscription::declare(runner.session(), bridge.command_topics(), tx).await {
            Ok(subscription) => subscription,
            Err(e) => {
                runner.close().await?;
                return Err(e).context("Failed to subscribe to command topics");
            }
        };

    let metadata = serde_json::json!({
        "device": device.describe(),
        "command_topics": subscription.topics(),
        "schedules": bridge
            .schedules()
            .iter()
            .map(|s| serde_json::json!({
                "name": s.name(),
                "interval_secs": s.interval().as_secs_f64(),
                "points": s.reads().iter().map(|r| r.point).collect::<Vec<_>>(),
            }))
            .collect::<Vec<_>>(),
    });

    let shutdown = runner.shutdown_signal();
    runner.spawn("powerbox", async move {
        let mut stopping = shutdown.clone();
        let unsubscribe = async move {
            // Undeclare as soon as shutdown starts, while the queue drains.
            let _ = stopping.wait_for(|stop| *stop).await;
            subscription.undeclare().await;
        };

        let (stats, ()) = tokio::join!(bridge.run(rx, shutdown), unsubscribe);
        info!(
            enqueued = stats.enqueued,
            executed = stats.executed,
            failed = stats.failed,
            replaced_writes = stats.replaced_writes,
            dropped_reads = stats.dropped_reads,
            abandoned = stats.abandoned,
            "Transaction queue stopped"
        );
    });

    runner.run_with_metadata(Some(metadata)).await?;
    Ok(())
}
