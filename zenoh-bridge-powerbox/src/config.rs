//! Configuration for the powerbox bridge.

use std::time::Duration;

use powerbox_bridge_framework::{BridgeConfig, BridgeError, LoggingConfig, ZenohConfig};
use powerbox_common::{AuthConfig, DEFAULT_KEY_PREFIX};
use serde::{Deserialize, Serialize};

use crate::point::ControlPoint;
use crate::task::ReadSpec;

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PowerboxBridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Device, topic and scheduling settings
    #[serde(default)]
    pub powerbox: PowerboxConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bridge-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerboxConfig {
    /// Key expression prefix for command and state topics (default: "powerbox")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// The ventilation unit
    #[serde(default)]
    pub device: DeviceConfig,

    /// Points accepting write commands from the bus
    #[serde(default = "default_commands")]
    pub commands: Vec<ControlPoint>,

    /// Periodic read schedules
    #[serde(default = "default_schedules")]
    pub schedules: Vec<ScheduleConfig>,

    /// Transaction queue limits
    #[serde(default)]
    pub queue: QueueConfig,
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_commands() -> Vec<ControlPoint> {
    vec![ControlPoint::OperatingMode, ControlPoint::VentilationLevel]
}

fn default_schedules() -> Vec<ScheduleConfig> {
    vec![
        ScheduleConfig {
            name: "control".to_string(),
            interval_secs: 5,
            reads: vec![
                ReadConfig::plain(ControlPoint::OperatingMode),
                ReadConfig::plain(ControlPoint::VentilationLevel),
            ],
        },
        ScheduleConfig {
            name: "telemetry".to_string(),
            interval_secs: 60,
            reads: vec![
                ReadConfig::plain(ControlPoint::RoomTemperature).scaled(0.1, 1),
                ReadConfig::plain(ControlPoint::OutsideTemperature)
                    .scaled(0.1, 1)
                    .signed(),
                ReadConfig::plain(ControlPoint::Humidity),
            ],
        },
    ]
}

impl Default for PowerboxConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            device: DeviceConfig::default(),
            commands: default_commands(),
            schedules: default_schedules(),
            queue: QueueConfig::default(),
        }
    }
}

/// Configuration of the Modbus device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Connection type and address
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Deadline for one connect/transfer/close cycle, in milliseconds
    #[serde(default = "default_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,
}

fn default_unit_id() -> u8 {
    10
}

fn default_transaction_timeout_ms() -> u64 {
    3000
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            unit_id: default_unit_id(),
            transaction_timeout_ms: default_transaction_timeout_ms(),
        }
    }
}

impl DeviceConfig {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }
}

/// Connection configuration (TCP or RTU).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// Modbus TCP connection
    Tcp {
        /// Host address (IP or hostname)
        #[serde(default = "default_device_host")]
        host: String,
        /// TCP port (default: 502)
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    /// Modbus RTU (serial) connection
    Rtu {
        /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
        port: String,
        /// Baud rate (default: 9600)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        /// Data bits (default: 8)
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        /// Parity: "none", "even", or "odd" (default: "none")
        #[serde(default = "default_parity")]
        parity: String,
        /// Stop bits: 1 or 2 (default: 1)
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
}

fn default_device_host() -> String {
    "192.168.0.234".to_string()
}

fn default_modbus_port() -> u16 {
    502
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig::Tcp {
            host: default_device_host(),
            port: default_modbus_port(),
        }
    }
}

impl std::fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionConfig::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            ConnectionConfig::Rtu {
                port, baud_rate, ..
            } => write!(f, "rtu://{}@{}", port, baud_rate),
        }
    }
}

/// A periodic batch of reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Schedule name (for logs)
    pub name: String,

    /// Interval between batches in seconds
    pub interval_secs: u64,

    /// Points read on each tick, in order
    pub reads: Vec<ReadConfig>,
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// How one point is read and published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadConfig {
    /// Control point to read
    pub point: ControlPoint,

    /// Scaling factor (value * scale)
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Decimal digits in the published value
    #[serde(default)]
    pub precision: usize,

    /// Register interpretation
    #[serde(default)]
    pub data_type: DataType,
}

fn default_scale() -> f64 {
    1.0
}

impl ReadConfig {
    fn plain(point: ControlPoint) -> Self {
        Self {
            point,
            scale: default_scale(),
            precision: 0,
            data_type: DataType::default(),
        }
    }

    fn scaled(mut self, scale: f64, precision: usize) -> Self {
        self.scale = scale;
        self.precision = precision;
        self
    }

    fn signed(mut self) -> Self {
        self.data_type = DataType::I16;
        self
    }

    /// Resolve into a read task specification under `key_prefix`.
    pub fn to_spec(&self, key_prefix: &str) -> ReadSpec {
        ReadSpec::new(
            self.point,
            powerbox_common::topic(key_prefix, self.point.as_str()),
        )
        .with_scale(self.scale, self.precision)
        .with_data_type(self.data_type)
    }
}

/// Data type interpretation for a 16-bit register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Unsigned 16-bit integer (default)
    #[default]
    U16,
    /// Signed 16-bit integer
    I16,
}

/// Transaction queue limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queued reads kept per point before the oldest is dropped (minimum 2)
    #[serde(default = "default_max_pending_reads")]
    pub max_pending_reads_per_point: usize,

    /// Time allowed to finish queued work on shutdown, in milliseconds
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_max_pending_reads() -> usize {
    4
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_pending_reads_per_point: default_max_pending_reads(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl QueueConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Values supplied on the command line, applied over the file configuration.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub key_prefix: Option<String>,
    pub device_host: Option<String>,
    pub device_port: Option<u16>,
    pub unit_id: Option<u8>,
    pub connect: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl PowerboxBridgeConfig {
    /// Apply command line overrides.
    ///
    /// A device host or port switches an RTU connection to TCP.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(prefix) = &overrides.key_prefix {
            self.powerbox.key_prefix = prefix.clone();
        }

        if overrides.device_host.is_some() || overrides.device_port.is_some() {
            let (mut host, mut port) = match &self.powerbox.device.connection {
                ConnectionConfig::Tcp { host, port } => (host.clone(), *port),
                ConnectionConfig::Rtu { .. } => (default_device_host(), default_modbus_port()),
            };
            if let Some(h) = &overrides.device_host {
                host = h.clone();
            }
            if let Some(p) = overrides.device_port {
                port = p;
            }
            self.powerbox.device.connection = ConnectionConfig::Tcp { host, port };
        }

        if let Some(unit_id) = overrides.unit_id {
            self.powerbox.device.unit_id = unit_id;
        }

        if !overrides.connect.is_empty() {
            self.zenoh.connect = overrides.connect.clone();
        }

        if let Some(user) = &overrides.username {
            let password = overrides
                .password
                .clone()
                .or_else(|| self.zenoh.auth.as_ref().map(|a| a.password.clone()))
                .unwrap_or_default();
            self.zenoh.auth = Some(AuthConfig {
                user: user.clone(),
                password,
            });
        } else if let (Some(password), Some(auth)) = (&overrides.password, &mut self.zenoh.auth) {
            auth.password = password.clone();
        }
    }

    /// Read specifications for each schedule, paired with the schedule.
    pub fn schedule_specs(&self) -> Vec<(&ScheduleConfig, Vec<ReadSpec>)> {
        self.powerbox
            .schedules
            .iter()
            .map(|s| {
                let specs = s
                    .reads
                    .iter()
                    .map(|r| r.to_spec(&self.powerbox.key_prefix))
                    .collect();
                (s, specs)
            })
            .collect()
    }
}

impl BridgeConfig for PowerboxBridgeConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn key_prefix(&self) -> &str {
        &self.powerbox.key_prefix
    }

    fn validate(&self) -> Result<(), BridgeError> {
        let pb = &self.powerbox;

        powerbox_common::keyexpr::validate_prefix(&pb.key_prefix)
            .map_err(|e| BridgeError::validation(e.to_string()))?;

        let device = &pb.device;
        if device.unit_id == 0 || device.unit_id > 247 {
            return Err(BridgeError::validation(format!(
                "unit_id must be 1-247, got {}",
                device.unit_id
            )));
        }

        if device.transaction_timeout_ms == 0 {
            return Err(BridgeError::validation(
                "transaction_timeout_ms must be greater than 0",
            ));
        }

        match &device.connection {
            ConnectionConfig::Tcp { host, .. } if host.is_empty() => {
                return Err(BridgeError::validation("device host cannot be empty"));
            }
            ConnectionConfig::Rtu { parity, .. } => match parity.to_lowercase().as_str() {
                "none" | "even" | "odd" => {}
                _ => {
                    return Err(BridgeError::validation(format!(
                        "invalid parity '{}' (use none, even, or odd)",
                        parity
                    )));
                }
            },
            _ => {}
        }

        if pb.commands.is_empty() && pb.schedules.is_empty() {
            return Err(BridgeError::validation(
                "at least one command point or schedule must be configured",
            ));
        }

        for point in &pb.commands {
            if !point.is_writable() {
                return Err(BridgeError::validation(format!(
                    "'{}' is read-only and cannot accept commands",
                    point
                )));
            }
        }

        for schedule in &pb.schedules {
            if schedule.interval_secs == 0 {
                return Err(BridgeError::validation(format!(
                    "schedule '{}': interval_secs must be greater than 0",
                    schedule.name
                )));
            }

            if schedule.reads.is_empty() {
                return Err(BridgeError::validation(format!(
                    "schedule '{}': at least one read is required",
                    schedule.name
                )));
            }

            for read in &schedule.reads {
                if !read.scale.is_finite() || read.scale == 0.0 {
                    return Err(BridgeError::validation(format!(
                        "schedule '{}': invalid scale {} for '{}'",
                        schedule.name, read.scale, read.point
                    )));
                }
                if read.precision > 6 {
                    return Err(BridgeError::validation(format!(
                        "schedule '{}': precision for '{}' must be at most 6",
                        schedule.name, read.point
                    )));
                }
            }
        }

        if pb.queue.max_pending_reads_per_point < 2 {
            return Err(BridgeError::validation(
                "max_pending_reads_per_point must be at least 2",
            ));
        }

        Ok(())
    }
}
