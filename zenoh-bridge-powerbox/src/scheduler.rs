//! Periodic read schedules feeding the transaction queue.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::ScheduleConfig;
use crate::queue::{Enqueued, QueueError, TransactionQueue};
use crate::task::{ReadSpec, Task};

/// A named cadence and the reads it enqueues on every tick.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    name: String,
    interval: Duration,
    reads: Vec<ReadSpec>,
}

impl PollSchedule {
    pub fn new(name: impl Into<String>, interval: Duration, reads: Vec<ReadSpec>) -> Self {
        Self {
            name: name.into(),
            interval,
            reads,
        }
    }

    pub fn from_config(config: &ScheduleConfig, reads: Vec<ReadSpec>) -> Self {
        Self::new(config.name.clone(), config.interval(), reads)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn reads(&self) -> &[ReadSpec] {
        &self.reads
    }

    /// Enqueue one read per configured point, in configuration order.
    ///
    /// Returns the number of queued reads that were dropped by the per-point
    /// cap to make room.
    pub fn enqueue_batch(&self, queue: &TransactionQueue) -> Result<usize, QueueError> {
        let mut dropped = 0;
        for spec in &self.reads {
            if queue.enqueue(Task::read(spec.clone()))? == Enqueued::DroppedOldestRead {
                dropped += 1;
            }
        }
        Ok(dropped)
    }

    /// Tick until shutdown or until the queue closes.
    ///
    /// The first tick fires immediately. Ticks follow the wall clock, not the
    /// queue: a slow device leads to backlog rather than skipped ticks.
    pub async fn run(self, queue: TransactionQueue, mut shutdown: watch::Receiver<bool>) {
        info!(
            schedule = %self.name,
            interval_secs = self.interval.as_secs_f64(),
            reads = self.reads.len(),
            "Poll schedule started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = ticker.tick() => {
                    match self.enqueue_batch(&queue) {
                        Ok(0) => debug!(schedule = %self.name, "Reads queued"),
                        Ok(dropped) => warn!(
                            schedule = %self.name,
                            dropped,
                            "Device is falling behind; dropped stale reads"
                        ),
                        Err(QueueError::Closed) => break,
                    }
                }
            }
        }

        info!(schedule = %self.name, "Poll schedule stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::ControlPoint;

    fn control() -> PollSchedule {
        PollSchedule::new(
            "control",
            Duration::from_secs(5),
            vec![
                ReadSpec::new(ControlPoint::OperatingMode, "powerbox/operating_mode"),
                ReadSpec::new(ControlPoint::VentilationLevel, "powerbox/ventilation_level"),
            ],
        )
    }

    fn points(queue: &TransactionQueue) -> Vec<ControlPoint> {
        queue.snapshot().iter().map(Task::point).collect()
    }

    #[test]
    fn test_batch_keeps_order() {
        let queue = TransactionQueue::new(4);
        assert_eq!(control().enqueue_batch(&queue), Ok(0));
        assert_eq!(
            points(&queue),
            vec![ControlPoint::OperatingMode, ControlPoint::VentilationLevel]
        );
    }

    #[test]
    fn test_batch_reports_dropped_reads() {
        let queue = TransactionQueue::new(2);
        let schedule = control();
        schedule.enqueue_batch(&queue).unwrap();
        schedule.enqueue_batch(&queue).unwrap();
        assert_eq!(schedule.enqueue_batch(&queue), Ok(2));
        assert_eq!(queue.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_follow_interval() {
        let queue = TransactionQueue::new(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(control().run(queue.clone(), shutdown_rx));

        // First tick is immediate.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(queue.len(), 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(queue.len(), 4);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(queue.len(), 8);

        shutdown_tx.send_replace(true);
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(queue.len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_queue_closes() {
        let queue = TransactionQueue::new(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(control().run(queue.clone(), shutdown_rx));

        tokio::time::sleep(Duration::from_millis(1)).await;
        queue.close();

        let stopped = tokio::time::timeout(Duration::from_secs(6), handle).await;
        assert!(stopped.is_ok());
    }
}
