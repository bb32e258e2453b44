//! Command ingestion: inbound bus messages to queued writes.

use powerbox_common::Origin;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::bus::InboundMessage;
use crate::point::TopicTable;
use crate::queue::{Enqueued, QueueError, TransactionQueue};
use crate::task::Task;

/// Error returned for a payload that is not a register value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload is not UTF-8")]
    NotUtf8,
    #[error("'{0}' is not an integer in 0..=65535")]
    NotRegisterValue(String),
}

/// Parse a command payload as a decimal 16-bit register value.
///
/// Surrounding whitespace is ignored.
pub fn parse_command_value(payload: &[u8]) -> Result<u16, PayloadError> {
    let text = std::str::from_utf8(payload).map_err(|_| PayloadError::NotUtf8)?;
    let text = text.trim();
    text.parse::<u16>()
        .map_err(|_| PayloadError::NotRegisterValue(text.to_string()))
}

/// Outcome of handling one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingested {
    /// A write was queued.
    Queued(Enqueued),
    /// The message carried the self-origin tag.
    Echo,
    /// The topic is not a command topic.
    UnknownTopic,
    Malformed(PayloadError),
    Rejected(QueueError),
}

/// Maps command topics to control points and queues writes.
#[derive(Debug, Clone)]
pub struct CommandIngestor {
    table: TopicTable,
    queue: TransactionQueue,
}

impl CommandIngestor {
    pub fn new(table: TopicTable, queue: TransactionQueue) -> Self {
        Self { table, queue }
    }

    pub fn table(&self) -> &TopicTable {
        &self.table
    }

    /// Handle one message. Never blocks and never touches the device.
    pub fn on_message(&self, message: &InboundMessage) -> Ingested {
        if message.properties.origin() == Origin::Bridge {
            debug!(topic = %message.topic, "Ignoring self-originated message");
            return Ingested::Echo;
        }

        let Some(point) = self.table.resolve(&message.topic) else {
            debug!(topic = %message.topic, "Ignoring message on unmapped topic");
            return Ingested::UnknownTopic;
        };

        let value = match parse_command_value(&message.payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "Dropping malformed command");
                return Ingested::Malformed(e);
            }
        };

        match self.queue.enqueue(Task::write(point, value)) {
            Ok(outcome) => {
                match outcome {
                    Enqueued::Replaced(n) => {
                        info!(point = %point, value, superseded = n, "Command queued")
                    }
                    _ => info!(point = %point, value, "Command queued"),
                }
                Ingested::Queued(outcome)
            }
            Err(e) => {
                warn!(point = %point, value, error = %e, "Command rejected");
                Ingested::Rejected(e)
            }
        }
    }

    /// Consume messages until the channel closes or shutdown is signalled.
    ///
    /// On shutdown the receiver is closed, so later messages are refused at
    /// the subscriber.
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!(topics = self.table.len(), "Command ingestion started");

        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                message = rx.recv() => match message {
                    Some(message) => {
                        self.on_message(&message);
                    }
                    None => break,
                },
            }
        }

        rx.close();
        debug!("Command ingestion stopped");
    }
}
