//! The bridge context: one queue, one worker, its producers.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bus::{BusPublisher, InboundMessage};
use crate::config::PowerboxBridgeConfig;
use crate::device::FieldDevice;
use crate::ingest::CommandIngestor;
use crate::point::TopicTable;
use crate::queue::{QueueStats, TransactionQueue};
use crate::scheduler::PollSchedule;
use crate::worker::{TaskExecutor, run_worker};

/// Owns everything that touches the transaction queue.
pub struct Bridge<D, B> {
    queue: TransactionQueue,
    executor: TaskExecutor<D, B>,
    ingestor: CommandIngestor,
    schedules: Vec<PollSchedule>,
    drain_timeout: Duration,
}

impl<D: FieldDevice, B: BusPublisher> Bridge<D, B> {
    pub fn new(config: &PowerboxBridgeConfig, device: D, bus: B) -> Self {
        let pb = &config.powerbox;
        let queue = TransactionQueue::new(pb.queue.max_pending_reads_per_point);

        let table = TopicTable::new(&pb.key_prefix, pb.commands.iter().copied());
        let schedules = config
            .schedule_specs()
            .into_iter()
            .map(|(schedule, reads)| PollSchedule::from_config(schedule, reads))
            .collect();

        Self {
            ingestor: CommandIngestor::new(table, queue.clone()),
            executor: TaskExecutor::new(device, bus, pb.device.transaction_timeout()),
            queue,
            schedules,
            drain_timeout: pb.queue.drain_timeout(),
        }
    }

    pub fn queue(&self) -> &TransactionQueue {
        &self.queue
    }

    pub fn command_topics(&self) -> Vec<&str> {
        self.ingestor.table().topics()
    }

    pub fn schedules(&self) -> &[PollSchedule] {
        &self.schedules
    }

    /// Run until `shutdown` turns true, then wind down.
    ///
    /// Shutdown stops the schedules and ingestion, waits up to the drain
    /// timeout for queued work, closes the queue and joins the worker.
    pub async fn run(
        self,
        inbound: mpsc::Receiver<InboundMessage>,
        shutdown: watch::Receiver<bool>,
    ) -> QueueStats {
        let Bridge {
            queue,
            executor,
            ingestor,
            schedules,
            drain_timeout,
        } = self;

        let worker = tokio::spawn(run_worker(queue.clone(), executor));

        let mut producers: Vec<(String, JoinHandle<()>)> = schedules
            .into_iter()
            .map(|schedule| {
                let name = format!("schedule '{}'", schedule.name());
                let handle = tokio::spawn(schedule.run(queue.clone(), shutdown.clone()));
                (name, handle)
            })
            .collect();
        producers.push((
            "ingestion".to_string(),
            tokio::spawn(ingestor.run(inbound, shutdown.clone())),
        ));

        for (name, handle) in producers {
            if let Err(e) = handle.await {
                warn!(task = %name, error = %e, "Producer task failed");
            }
        }

        let pending = queue.len();
        if tokio::time::timeout(drain_timeout, queue.drain()).await.is_err() {
            warn!(pending = queue.len(), "Queue did not drain in time");
        } else if pending > 0 {
            info!(pending, "Queue drained");
        }

        let abandoned = queue.close();
        if abandoned > 0 {
            warn!(abandoned, "Abandoned queued tasks");
        }

        if let Err(e) = worker.await {
            warn!(error = %e, "Transaction worker failed");
        }

        queue.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use powerbox_common::UserProperties;

    use crate::bus::BusError;
    use crate::device::DeviceError;

    #[derive(Clone, Default)]
    struct Counter(Arc<Mutex<Vec<u16>>>);

    #[async_trait]
    impl FieldDevice for Counter {
        type Connection = ();

        async fn connect(&self) -> Result<(), DeviceError> {
            Ok(())
        }

        async fn read(&self, _: &mut (), address: u16) -> Result<u16, DeviceError> {
            self.0.lock().unwrap().push(address);
            Ok(1)
        }

        async fn write(&self, _: &mut (), address: u16, _: u16) -> Result<(), DeviceError> {
            self.0.lock().unwrap().push(address);
            Ok(())
        }

        async fn close(&self, _: ()) -> Result<(), DeviceError> {
            Ok(())
        }

        fn describe(&self) -> String {
            "counter".to_string()
        }
    }

    struct NullBus;

    #[async_trait]
    impl BusPublisher for NullBus {
        async fn publish(&self, _: &str, _: String, _: UserProperties) -> Result<(), BusError> {
            Ok(())
        }
    }

    #[test]
    fn test_built_from_default_config() {
        let bridge = Bridge::new(&PowerboxBridgeConfig::default(), Counter::default(), NullBus);

        assert_eq!(
            bridge.command_topics(),
            vec!["powerbox/operating_mode", "powerbox/ventilation_level"]
        );
        let names: Vec<&str> = bridge.schedules().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["control", "telemetry"]);
        assert!(bridge.queue().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_then_stops() {
        let device = Counter::default();
        let bridge = Bridge::new(&PowerboxBridgeConfig::default(), device.clone(), NullBus);
        let (_tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(bridge.run(rx, shutdown_rx));
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown_tx.send_replace(true);
        let stats = handle.await.unwrap();

        // One immediate tick of each default schedule.
        assert_eq!(stats.executed, 5);
        assert_eq!(*device.0.lock().unwrap(), vec![550, 554, 700, 703, 750]);
    }
}
