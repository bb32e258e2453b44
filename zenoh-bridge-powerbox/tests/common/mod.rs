//! In-memory device and bus doubles.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use powerbox_common::UserProperties;
use zenoh_bridge_powerbox::bus::{BusError, BusPublisher, InboundMessage};
use zenoh_bridge_powerbox::device::{DeviceError, FieldDevice};
use zenoh_bridge_powerbox::queue::TransactionQueue;
use zenoh_bridge_powerbox::worker::{TaskExecutor, run_worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Connect,
    Read(u16),
    Write(u16, u16),
    Close,
}

#[derive(Debug, Default)]
struct DeviceState {
    registers: HashMap<u16, u16>,
    open: usize,
    max_open: usize,
    failing_connects: usize,
    ops: Vec<Op>,
}

/// Register map behind a connection counter.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
    latency: Duration,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every transfer takes `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_register(&self, address: u16, value: u16) {
        self.state.lock().unwrap().registers.insert(address, value);
    }

    pub fn register(&self, address: u16) -> Option<u16> {
        self.state.lock().unwrap().registers.get(&address).copied()
    }

    /// Make the next `n` connects fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.state.lock().unwrap().failing_connects = n;
    }

    pub fn ops(&self) -> Vec<Op> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Write(address, value) => Some((address, value)),
                _ => None,
            })
            .collect()
    }

    pub fn reads(&self) -> Vec<u16> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Read(address) => Some(address),
                _ => None,
            })
            .collect()
    }

    pub fn open_connections(&self) -> usize {
        self.state.lock().unwrap().open
    }

    pub fn max_open_connections(&self) -> usize {
        self.state.lock().unwrap().max_open
    }

    async fn pause(&self) {
        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl FieldDevice for MockDevice {
    type Connection = ();

    async fn connect(&self) -> Result<(), DeviceError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(DeviceError::Connection("connection refused".to_string()));
            }
            state.open += 1;
            state.max_open = state.max_open.max(state.open);
            state.ops.push(Op::Connect);
        }
        self.pause().await;
        Ok(())
    }

    async fn read(&self, _conn: &mut (), address: u16) -> Result<u16, DeviceError> {
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        state.ops.push(Op::Read(address));
        state
            .registers
            .get(&address)
            .copied()
            .ok_or_else(|| DeviceError::Exception(format!("IllegalDataAddress {}", address)))
    }

    async fn write(&self, _conn: &mut (), address: u16, value: u16) -> Result<(), DeviceError> {
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        state.ops.push(Op::Write(address, value));
        state.registers.insert(address, value);
        Ok(())
    }

    async fn close(&self, _conn: ()) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        state.open -= 1;
        state.ops.push(Op::Close);
        Ok(())
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub properties: UserProperties,
}

impl Published {
    /// The sample as a subscriber on the same topic would receive it.
    ///
    /// Properties go through the attachment encoding.
    pub fn echo(&self) -> InboundMessage {
        let attachment = self.properties.to_bytes().unwrap();
        InboundMessage::new(self.topic.clone(), self.payload.clone())
            .with_properties(UserProperties::from_attachment(Some(&attachment)))
    }
}

/// Records every publish.
#[derive(Debug, Clone, Default)]
pub struct RecordingBus {
    published: Arc<Mutex<Vec<Published>>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<(String, String)> {
        self.published()
            .into_iter()
            .map(|p| (p.topic, p.payload))
            .collect()
    }
}

#[async_trait]
impl BusPublisher for RecordingBus {
    async fn publish(
        &self,
        topic: &str,
        payload: String,
        properties: UserProperties,
    ) -> Result<(), BusError> {
        self.published.lock().unwrap().push(Published {
            topic: topic.to_string(),
            payload,
            properties,
        });
        Ok(())
    }
}

pub fn executor(device: &MockDevice, bus: &RecordingBus) -> TaskExecutor<MockDevice, RecordingBus> {
    TaskExecutor::new(device.clone(), bus.clone(), Duration::from_secs(3))
}

/// Run a worker over everything queued so far, then stop it.
pub async fn run_to_completion(queue: &TransactionQueue, device: &MockDevice, bus: &RecordingBus) {
    let worker = tokio::spawn(run_worker(queue.clone(), executor(device, bus)));
    queue.drain().await;
    queue.close();
    worker.await.unwrap();
}
