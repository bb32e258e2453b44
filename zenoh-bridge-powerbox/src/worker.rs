//! The single consumer of the transaction queue.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::bus::{BusError, BusPublisher};
use crate::device::{DeviceError, FieldDevice};
use crate::point::ControlPoint;
use crate::publish::publish_reading;
use crate::queue::TransactionQueue;
use crate::task::{ReadSpec, Task};

/// Why a task was abandoned.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("transaction exceeded {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Publish(#[from] BusError),
}

/// Runs tasks against the device and publishes read results.
pub struct TaskExecutor<D, B> {
    device: D,
    bus: B,
    transaction_timeout: Duration,
}

impl<D: FieldDevice, B: BusPublisher> TaskExecutor<D, B> {
    pub fn new(device: D, bus: B, transaction_timeout: Duration) -> Self {
        Self {
            device,
            bus,
            transaction_timeout,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Execute one task to completion.
    pub async fn execute(&self, task: &Task) -> Result<(), TaskError> {
        match task {
            Task::Write { point, value } => self.write(*point, *value).await,
            Task::Read(spec) => self.read_and_publish(spec).await,
        }
    }

    async fn write(&self, point: ControlPoint, value: u16) -> Result<(), TaskError> {
        let device = &self.device;
        self.with_deadline(async {
            let mut conn = device.connect().await?;
            info!(point = %point, value, "Writing value");
            let result = device.write(&mut conn, point.address(), value).await;
            release(device, conn).await;
            result
        })
        .await
    }

    async fn read_and_publish(&self, spec: &ReadSpec) -> Result<(), TaskError> {
        let device = &self.device;
        let raw = self
            .with_deadline(async {
                let mut conn = device.connect().await?;
                debug!(point = %spec.point, "Reading value");
                let result = device.read(&mut conn, spec.point.address()).await;
                release(device, conn).await;
                result
            })
            .await?;

        publish_reading(&self.bus, spec, raw).await?;
        Ok(())
    }

    /// Bound a whole connect/transfer/close cycle.
    ///
    /// On expiry the cycle's future is dropped, which drops its connection.
    async fn with_deadline<T>(
        &self,
        transaction: impl Future<Output = Result<T, DeviceError>>,
    ) -> Result<T, TaskError> {
        match tokio::time::timeout(self.transaction_timeout, transaction).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TaskError::Timeout(self.transaction_timeout)),
        }
    }
}

/// Close a connection, logging instead of failing the transaction.
async fn release<D: FieldDevice>(device: &D, conn: D::Connection) {
    if let Err(e) = device.close(conn).await {
        warn!(error = %e, "Failed to close device connection");
    }
}

/// Consume the queue until it is closed.
///
/// A failed task is logged and dropped; the next task runs regardless.
pub async fn run_worker<D: FieldDevice, B: BusPublisher>(
    queue: TransactionQueue,
    executor: TaskExecutor<D, B>,
) {
    info!(device = %executor.device().describe(), "Transaction worker started");

    while let Some(job) = queue.next().await {
        match executor.execute(job.task()).await {
            Ok(()) => job.succeeded(),
            Err(e) => {
                warn!(task = %job.task(), error = %e, "Task abandoned");
                job.failed();
            }
        }
    }

    info!("Transaction worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use powerbox_common::{Origin, UserProperties};

    /// Scripted device: reads return `value`, `fail` makes connects fail,
    /// `hang` makes transfers never complete.
    #[derive(Default)]
    struct ScriptedDevice {
        value: u16,
        fail: bool,
        hang: bool,
        log: Mutex<Vec<String>>,
    }

    impl ScriptedDevice {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    #[async_trait]
    impl FieldDevice for ScriptedDevice {
        type Connection = ();

        async fn connect(&self) -> Result<(), DeviceError> {
            if self.fail {
                return Err(DeviceError::Connection("refused".to_string()));
            }
            self.record("connect".to_string());
            Ok(())
        }

        async fn read(&self, _conn: &mut (), address: u16) -> Result<u16, DeviceError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.record(format!("read {}", address));
            Ok(self.value)
        }

        async fn write(&self, _conn: &mut (), address: u16, value: u16) -> Result<(), DeviceError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.record(format!("write {}={}", address, value));
            Ok(())
        }

        async fn close(&self, _conn: ()) -> Result<(), DeviceError> {
            self.record("close".to_string());
            Ok(())
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<(String, String, UserProperties)>>,
    }

    #[async_trait]
    impl BusPublisher for RecordingBus {
        async fn publish(
            &self,
            topic: &str,
            payload: String,
            properties: UserProperties,
        ) -> Result<(), BusError> {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload, properties));
            Ok(())
        }
    }

    fn executor(device: ScriptedDevice) -> TaskExecutor<ScriptedDevice, RecordingBus> {
        TaskExecutor::new(device, RecordingBus::default(), Duration::from_secs(3))
    }

    #[tokio::test]
    async fn test_write_opens_and_closes_connection() {
        let executor = executor(ScriptedDevice::default());
        executor
            .execute(&Task::write(ControlPoint::VentilationLevel, 2))
            .await
            .unwrap();

        assert_eq!(executor.device.log(), vec!["connect", "write 554=2", "close"]);
        assert!(executor.bus.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_publishes_after_close() {
        let executor = executor(ScriptedDevice {
            value: 215,
            ..Default::default()
        });
        let spec = ReadSpec::new(ControlPoint::RoomTemperature, "powerbox/room_temperature")
            .with_scale(0.1, 1);
        executor.execute(&Task::read(spec)).await.unwrap();

        assert_eq!(executor.device.log(), vec!["connect", "read 700", "close"]);
        let published = executor.bus.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "powerbox/room_temperature");
        assert_eq!(published[0].1, "21.5");
        assert_eq!(published[0].2.origin(), Origin::Bridge);
    }

    #[tokio::test]
    async fn test_connect_failure_publishes_nothing() {
        let executor = executor(ScriptedDevice {
            fail: true,
            ..Default::default()
        });
        let spec = ReadSpec::new(ControlPoint::Humidity, "powerbox/humidity");
        let result = executor.execute(&Task::read(spec)).await;

        assert!(matches!(result, Err(TaskError::Device(DeviceError::Connection(_)))));
        assert!(executor.bus.published.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_transfer_times_out() {
        let executor = executor(ScriptedDevice {
            hang: true,
            ..Default::default()
        });
        let result = executor
            .execute(&Task::write(ControlPoint::OperatingMode, 1))
            .await;

        assert!(matches!(result, Err(TaskError::Timeout(d)) if d == Duration::from_secs(3)));
        assert_eq!(executor.device.log(), vec!["connect"]);
    }

    #[tokio::test]
    async fn test_worker_continues_after_failure() {
        let queue = TransactionQueue::new(4);
        queue
            .enqueue(Task::write(ControlPoint::OperatingMode, 1))
            .unwrap();
        queue
            .enqueue(Task::write(ControlPoint::VentilationLevel, 3))
            .unwrap();

        let worker = tokio::spawn(run_worker(
            queue.clone(),
            executor(ScriptedDevice {
                fail: true,
                ..Default::default()
            }),
        ));

        queue.drain().await;
        queue.close();
        worker.await.unwrap();

        let stats = queue.stats();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.executed, 0);
    }
}
