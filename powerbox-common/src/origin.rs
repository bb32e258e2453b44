//! Origin tagging for bus messages.
//!
//! Samples published by the bridge carry a set of user properties in their
//! Zenoh attachment. The `self` property marks a sample as bridge-originated
//! so that the command path can drop it instead of writing it back to the
//! device. The payload itself is never touched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// User property carrying the self-origin marker.
pub const SELF_PROPERTY: &str = "self";

/// Who produced a bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Published by this bridge.
    Bridge,
    /// Published by anyone else.
    External,
}

/// String key/value metadata attached to a sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserProperties(BTreeMap<String, String>);

impl UserProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Properties marking a message as published by the bridge.
    pub fn self_originated() -> Self {
        Self::new().with(SELF_PROPERTY, "true")
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn origin(&self) -> Origin {
        match self.get(SELF_PROPERTY) {
            Some("true") => Origin::Bridge,
            _ => Origin::External,
        }
    }

    /// Encode as attachment bytes (a JSON object).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from attachment bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decode an optional attachment.
    ///
    /// A missing or undecodable attachment yields empty properties, i.e. an
    /// externally originated message.
    pub fn from_attachment(bytes: Option<&[u8]>) -> Self {
        match bytes {
            None => Self::default(),
            Some(bytes) => Self::from_bytes(bytes).unwrap_or_else(|e| {
                tracing::debug!(error = %e, "Ignoring undecodable attachment");
                Self::default()
            }),
        }
    }
}
