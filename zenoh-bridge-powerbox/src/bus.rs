//! Bus side of the bridge: publishing and command subscriptions.

use async_trait::async_trait;
use powerbox_bridge_framework::{BridgeError, Publisher};
use powerbox_common::UserProperties;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use zenoh::Session;
use zenoh::pubsub::Subscriber;
use zenoh::sample::{Sample, SampleKind};

/// Error type for bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Publish to '{topic}' failed: {message}")]
    Publish { topic: String, message: String },
    #[error("Subscribe to '{topic}' failed: {message}")]
    Subscribe { topic: String, message: String },
}

/// Capability to publish a payload with message-level properties.
#[async_trait]
pub trait BusPublisher: Send + Sync + 'static {
    async fn publish(
        &self,
        topic: &str,
        payload: String,
        properties: UserProperties,
    ) -> Result<(), BusError>;
}

#[async_trait]
impl BusPublisher for Publisher {
    async fn publish(
        &self,
        topic: &str,
        payload: String,
        properties: UserProperties,
    ) -> Result<(), BusError> {
        self.publish_with_properties(topic, payload.into_bytes(), &properties)
            .await
            .map_err(|e| match e {
                BridgeError::Publish { key, message } => BusError::Publish {
                    topic: key,
                    message,
                },
                other => BusError::Publish {
                    topic: topic.to_string(),
                    message: other.to_string(),
                },
            })
    }
}

/// A message received on a command topic.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub properties: UserProperties,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            properties: UserProperties::default(),
        }
    }

    pub fn with_properties(mut self, properties: UserProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Convert a Zenoh sample, decoding its attachment into properties.
    pub fn from_sample(sample: &Sample) -> Self {
        let attachment = sample.attachment().map(|a| a.to_bytes());
        Self {
            topic: sample.key_expr().as_str().to_string(),
            payload: sample.payload().to_bytes().into_owned(),
            properties: UserProperties::from_attachment(attachment.as_deref()),
        }
    }
}

/// Subscribers on every command topic, forwarding into one channel.
pub struct CommandSubscription {
    subscribers: Vec<(String, Subscriber<()>)>,
}

impl CommandSubscription {
    /// Declare one subscriber per topic.
    ///
    /// Samples are handed to `tx` without blocking; when the channel is full
    /// or closed the sample is dropped with a warning.
    pub async fn declare<'a>(
        session: &Session,
        topics: impl IntoIterator<Item = &'a str>,
        tx: mpsc::Sender<InboundMessage>,
    ) -> Result<Self, BusError> {
        let mut subscribers = Vec::new();

        for topic in topics {
            let tx = tx.clone();
            let subscriber = session
                .declare_subscriber(topic)
                .callback(move |sample| forward(&tx, &sample))
                .await
                .map_err(|e| BusError::Subscribe {
                    topic: topic.to_string(),
                    message: e.to_string(),
                })?;

            info!(topic = %topic, "Subscribed to command topic");
            subscribers.push((topic.to_string(), subscriber));
        }

        Ok(Self { subscribers })
    }

    pub fn topics(&self) -> Vec<&str> {
        self.subscribers.iter().map(|(t, _)| t.as_str()).collect()
    }

    /// Undeclare all subscribers.
    pub async fn undeclare(self) {
        for (topic, subscriber) in self.subscribers {
            match subscriber.undeclare().await {
                Ok(()) => debug!(topic = %topic, "Unsubscribed"),
                Err(e) => warn!(topic = %topic, error = %e, "Failed to undeclare subscriber"),
            }
        }
    }
}

fn forward(tx: &mpsc::Sender<InboundMessage>, sample: &Sample) {
    if sample.kind() == SampleKind::Delete {
        trace!(key = %sample.key_expr(), "Ignoring delete sample");
        return;
    }

    if let Err(e) = tx.try_send(InboundMessage::from_sample(sample)) {
        warn!(key = %sample.key_expr(), error = %e, "Dropping inbound command");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use powerbox_common::Origin;

    #[test]
    fn test_inbound_defaults_to_external() {
        let msg = InboundMessage::new("powerbox/operating_mode", "1");
        assert_eq!(msg.properties.origin(), Origin::External);
        assert_eq!(msg.payload, b"1");
    }

    #[test]
    fn test_inbound_with_marker() {
        let msg = InboundMessage::new("powerbox/operating_mode", "1")
            .with_properties(UserProperties::self_originated());
        assert_eq!(msg.properties.origin(), Origin::Bridge);
    }
}
