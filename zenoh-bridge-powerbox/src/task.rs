//! Units of queued device work.

use std::fmt;

use crate::config::DataType;
use crate::point::ControlPoint;

/// Read-and-publish parameters for one control point.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadSpec {
    pub point: ControlPoint,
    /// Full key expression the formatted value is published to.
    pub topic: String,
    pub scale: f64,
    /// Decimal digits in the published value.
    pub precision: usize,
    pub data_type: DataType,
}

impl ReadSpec {
    /// Unscaled read with no decimals, published to `topic`.
    pub fn new(point: ControlPoint, topic: impl Into<String>) -> Self {
        Self {
            point,
            topic: topic.into(),
            scale: 1.0,
            precision: 0,
            data_type: DataType::default(),
        }
    }

    pub fn with_scale(mut self, scale: f64, precision: usize) -> Self {
        self.scale = scale;
        self.precision = precision;
        self
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }
}

/// Distinguishes reads from writes for debounce purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Read,
    Write,
}

/// One device transaction waiting in the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    /// Write `value` to the point's register.
    Write { point: ControlPoint, value: u16 },
    /// Read the point's register and publish the formatted value.
    Read(ReadSpec),
}

impl Task {
    pub fn write(point: ControlPoint, value: u16) -> Self {
        Task::Write { point, value }
    }

    pub fn read(spec: ReadSpec) -> Self {
        Task::Read(spec)
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Task::Write { .. } => TaskKind::Write,
            Task::Read(_) => TaskKind::Read,
        }
    }

    pub fn point(&self) -> ControlPoint {
        match self {
            Task::Write { point, .. } => *point,
            Task::Read(spec) => spec.point,
        }
    }

    /// Debounce identity; the payload is ignored.
    pub fn key(&self) -> (TaskKind, ControlPoint) {
        (self.kind(), self.point())
    }

    pub fn is_write_for(&self, point: ControlPoint) -> bool {
        self.key() == (TaskKind::Write, point)
    }

    pub fn is_read_for(&self, point: ControlPoint) -> bool {
        self.key() == (TaskKind::Read, point)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Write { point, value } => write!(f, "write {}={}", point, value),
            Task::Read(spec) => write!(f, "read {} -> {}", spec.point, spec.topic),
        }
    }
}
