//! Publisher for bridge-originated samples.

use std::sync::Arc;

use powerbox_common::UserProperties;

use crate::error::{BridgeError, Result};

/// Publisher for sending samples to Zenoh.
///
/// Every sample published through this type carries the self-origin marker
/// in its attachment, so the bridge never mistakes its own output for an
/// inbound command.
#[derive(Clone, Debug)]
pub struct Publisher {
    session: Arc<zenoh::Session>,
    key_prefix: String,
}

impl Publisher {
    /// Create a new publisher.
    pub fn new(session: Arc<zenoh::Session>, key_prefix: impl Into<String>) -> Self {
        Self {
            session,
            key_prefix: key_prefix.into(),
        }
    }

    /// Get the key prefix.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Publish a payload to a full key, tagged with the given properties.
    pub async fn publish_with_properties(
        &self,
        key: &str,
        payload: Vec<u8>,
        properties: &UserProperties,
    ) -> Result<()> {
        let attachment = properties.to_bytes()?;

        self.session
            .put(key, payload)
            .attachment(attachment)
            .await
            .map_err(|e| BridgeError::Publish {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }

    /// Publish raw bytes to a full key, marked as self-originated.
    pub async fn publish_raw(&self, key: &str, payload: Vec<u8>) -> Result<()> {
        self.publish_with_properties(key, payload, &UserProperties::self_originated())
            .await
    }

    /// Publish a JSON value to a full key.
    pub async fn publish_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish_raw(key, payload).await
    }
}
