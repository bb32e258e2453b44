//! Control points of the ventilation unit and their register addresses.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A named device register. The set is closed and fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlPoint {
    /// Operating mode (writable).
    OperatingMode,
    /// Boost ventilation switch (writable).
    BoostVentilation,
    /// Ventilation level (writable).
    VentilationLevel,
    /// Room temperature in tenths of a degree (read-only).
    RoomTemperature,
    /// Outside temperature in tenths of a degree (read-only).
    OutsideTemperature,
    /// Relative humidity in percent (read-only).
    Humidity,
}

impl ControlPoint {
    pub const ALL: [ControlPoint; 6] = [
        ControlPoint::OperatingMode,
        ControlPoint::BoostVentilation,
        ControlPoint::VentilationLevel,
        ControlPoint::RoomTemperature,
        ControlPoint::OutsideTemperature,
        ControlPoint::Humidity,
    ];

    /// Holding register address.
    pub fn address(&self) -> u16 {
        match self {
            ControlPoint::OperatingMode => 550,
            ControlPoint::BoostVentilation => 551,
            ControlPoint::VentilationLevel => 554,
            ControlPoint::RoomTemperature => 700,
            ControlPoint::OutsideTemperature => 703,
            ControlPoint::Humidity => 750,
        }
    }

    /// Name used in topics and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlPoint::OperatingMode => "operating_mode",
            ControlPoint::BoostVentilation => "boost_ventilation",
            ControlPoint::VentilationLevel => "ventilation_level",
            ControlPoint::RoomTemperature => "room_temperature",
            ControlPoint::OutsideTemperature => "outside_temperature",
            ControlPoint::Humidity => "humidity",
        }
    }

    /// Whether the device accepts writes to this point.
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            ControlPoint::OperatingMode
                | ControlPoint::BoostVentilation
                | ControlPoint::VentilationLevel
        )
    }
}

impl fmt::Display for ControlPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown control point name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown control point '{0}'")]
pub struct UnknownPoint(pub String);

impl FromStr for ControlPoint {
    type Err = UnknownPoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ControlPoint::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPoint(s.to_string()))
    }
}

/// Static map from command topic to control point.
#[derive(Debug, Clone, Default)]
pub struct TopicTable {
    by_topic: HashMap<String, ControlPoint>,
}

impl TopicTable {
    /// Build the table for `points` under `key_prefix`.
    pub fn new(key_prefix: &str, points: impl IntoIterator<Item = ControlPoint>) -> Self {
        let by_topic = points
            .into_iter()
            .map(|p| (powerbox_common::topic(key_prefix, p.as_str()), p))
            .collect();
        Self { by_topic }
    }

    pub fn resolve(&self, topic: &str) -> Option<ControlPoint> {
        self.by_topic.get(topic).copied()
    }

    /// All command topics, sorted.
    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.by_topic.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }

    pub fn len(&self) -> usize {
        self.by_topic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_topic.is_empty()
    }
}
