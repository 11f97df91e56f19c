//! Data values and timestamped samples
//!
//! A `PointValueTime` is the unit stored in the point-value cache and the
//! time-series store: one immutable `(value, timestamp)` pair.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ModelError, Result};

// ============================================================================
// Data Types
// ============================================================================

/// Data type of a point's value stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    /// Double-precision analog value
    Numeric,
    /// On/off state
    Binary,
    /// Enumerated integer state
    Multistate,
    /// Free text
    Alphanumeric,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Numeric => "NUMERIC",
            DataType::Binary => "BINARY",
            DataType::Multistate => "MULTISTATE",
            DataType::Alphanumeric => "ALPHANUMERIC",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged union over the four supported value kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataValue {
    Numeric(f64),
    Binary(bool),
    Multistate(i32),
    Alphanumeric(String),
}

impl DataValue {
    /// Data type carried by this value
    pub fn data_type(&self) -> DataType {
        match self {
            DataValue::Numeric(_) => DataType::Numeric,
            DataValue::Binary(_) => DataType::Binary,
            DataValue::Multistate(_) => DataType::Multistate,
            DataValue::Alphanumeric(_) => DataType::Alphanumeric,
        }
    }

    /// Numeric view of the value
    ///
    /// Binary maps to 1.0/0.0, multistate to its state code. Alphanumeric
    /// values have no numeric view.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::Numeric(v) => Some(*v),
            DataValue::Binary(b) => Some(if *b { 1.0 } else { 0.0 }),
            DataValue::Multistate(s) => Some(f64::from(*s)),
            DataValue::Alphanumeric(_) => None,
        }
    }

    /// Check whether `self` differs from `previous` enough to be logged
    ///
    /// Numeric values compare with the given tolerance (a change must be
    /// strictly greater than `tolerance`); all other kinds compare exactly.
    pub fn differs_from(&self, previous: &DataValue, tolerance: f64) -> bool {
        match (self, previous) {
            (DataValue::Numeric(a), DataValue::Numeric(b)) => {
                if a.is_nan() || b.is_nan() {
                    a.is_nan() != b.is_nan()
                } else {
                    (a - b).abs() > tolerance
                }
            },
            _ => self != previous,
        }
    }

    /// Ensure the value matches the expected data type
    pub fn ensure_type(&self, expected: DataType) -> Result<()> {
        let got = self.data_type();
        if got == expected {
            Ok(())
        } else {
            Err(ModelError::TypeMismatch {
                expected: expected.as_str(),
                got: got.as_str(),
            })
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Numeric(v) => write!(f, "{}", v),
            DataValue::Binary(b) => write!(f, "{}", b),
            DataValue::Multistate(s) => write!(f, "{}", s),
            DataValue::Alphanumeric(s) => f.write_str(s),
        }
    }
}

// ============================================================================
// Timestamped Samples
// ============================================================================

/// Immutable (value, timestamp) pair
///
/// Samples are ordered by `time`. Two samples with the same timestamp are
/// duplicates as far as the cache is concerned; the newer write wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointValueTime {
    pub value: DataValue,
    /// Milliseconds since the Unix epoch
    pub time: i64,
}

impl PointValueTime {
    pub fn new(value: DataValue, time: i64) -> Self {
        Self { value, time }
    }

    pub fn numeric(value: f64, time: i64) -> Self {
        Self::new(DataValue::Numeric(value), time)
    }

    pub fn binary(value: bool, time: i64) -> Self {
        Self::new(DataValue::Binary(value), time)
    }

    pub fn multistate(value: i32, time: i64) -> Self {
        Self::new(DataValue::Multistate(value), time)
    }

    pub fn alphanumeric(value: impl Into<String>, time: i64) -> Self {
        Self::new(DataValue::Alphanumeric(value.into()), time)
    }

    pub fn data_type(&self) -> DataType {
        self.value.data_type()
    }
}

impl fmt::Display for PointValueTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.value, self.time)
    }
}

/// Origin of a set-point write (user, script, event handler, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetPointSource {
    /// Source kind, e.g. "USER" or "EVENT_HANDLER"
    pub source_type: String,
    pub source_id: u32,
}

impl SetPointSource {
    pub fn new(source_type: impl Into<String>, source_id: u32) -> Self {
        Self {
            source_type: source_type.into(),
            source_id,
        }
    }
}

impl fmt::Display for SetPointSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_type, self.source_id)
    }
}

/// Sort order for streamed reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOrder {
    Ascending,
    Descending,
}
