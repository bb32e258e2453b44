//! Bridge status reporting.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::publisher::Publisher;

/// Bridge status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Bridge name (e.g., "powerbox").
    pub bridge: String,
    /// Bridge version.
    pub version: String,
    /// Current status ("running" or "offline").
    pub status: String,
    /// RFC 3339 timestamp of this report.
    pub timestamp: String,
    /// Additional metadata (bridge-specific).
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    fn with_state(bridge: impl Into<String>, version: impl Into<String>, status: &str) -> Self {
        Self {
            bridge: bridge.into(),
            version: version.into(),
            status: status.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Create a new status with "running" state.
    pub fn running(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_state(bridge, version, "running")
    }

    /// Create a status with "offline" state.
    pub fn offline(bridge: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_state(bridge, version, "offline")
    }

    /// Add metadata to the status.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Publish this status to `{key_prefix}/@/status`.
    pub async fn publish(&self, publisher: &Publisher) -> Result<()> {
        let key = powerbox_common::status_key(publisher.key_prefix());
        publisher.publish_json(&key, self).await
    }
}

/// Helper to publish bridge status on startup and shutdown.
pub struct StatusPublisher {
    publisher: Publisher,
    bridge_name: String,
    version: String,
}

impl StatusPublisher {
    /// Create a new status publisher.
    pub fn new(
        publisher: Publisher,
        bridge_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            bridge_name: bridge_name.into(),
            version: version.into(),
        }
    }

    /// Publish "running" status with optional metadata.
    pub async fn publish_running(&self, metadata: Option<serde_json::Value>) -> Result<()> {
        let mut status = BridgeStatus::running(&self.bridge_name, &self.version);
        if let Some(meta) = metadata {
            status = status.with_metadata(meta);
        }
        status.publish(&self.publisher).await
    }

    /// Publish "offline" status.
    pub async fn publish_offline(&self) -> Result<()> {
        BridgeStatus::offline(&self.bridge_name, &self.version)
            .publish(&self.publisher)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_running() {
        let status = BridgeStatus::running("powerbox", "0.2.0");
        assert_eq!(status.bridge, "powerbox");
        assert_eq!(status.status, "running");
        assert!(chrono::DateTime::parse_from_rfc3339(&status.timestamp).is_ok());
    }

    #[test]
    fn test_status_offline_has_no_metadata() {
        let status = BridgeStatus::offline("powerbox", "0.2.0");
        assert_eq!(status.status, "offline");

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "offline");
        assert!(json.get("device").is_none());
    }

    #[test]
    fn test_status_serialization_flattens_metadata() {
        let status = BridgeStatus::running("powerbox", "0.2.0").with_metadata(serde_json::json!({
            "device": "tcp://192.168.0.234:502",
            "command_topics": ["powerbox/operating_mode"],
        }));

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"bridge\":\"powerbox\""));
        assert!(json.contains("\"status\":\"running\""));
        assert!(json.contains("\"device\":\"tcp://192.168.0.234:502\""));
    }
}
