//! Data point configuration
//!
//! `DataPointConfig` is the slice of a point's configuration the history
//! layer needs: identity, data type, logging policy and cache sizing.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::value::DataType;

/// Logical data point identifier
pub type PointId = u32;

/// Identity of one point's value stream in the time-series store
pub type SeriesId = u32;

// ============================================================================
// Logging Policy
// ============================================================================

/// When a point persists incoming values to the time-series store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoggingType {
    /// Log when the value changes by more than the tolerance
    #[default]
    OnChange,
    /// Log every value
    All,
    /// Never log, cache only
    None,
    /// Log at fixed interval boundaries
    Interval,
    /// Log when the timestamp changes
    OnTsChange,
    /// Log on change, and at intervals measured from the last change
    OnChangeInterval,
}

impl LoggingType {
    /// Stored integer code
    pub fn code(&self) -> i32 {
        match self {
            LoggingType::OnChange => 1,
            LoggingType::All => 2,
            LoggingType::None => 3,
            LoggingType::Interval => 4,
            LoggingType::OnTsChange => 5,
            LoggingType::OnChangeInterval => 6,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            1 => Ok(LoggingType::OnChange),
            2 => Ok(LoggingType::All),
            3 => Ok(LoggingType::None),
            4 => Ok(LoggingType::Interval),
            5 => Ok(LoggingType::OnTsChange),
            6 => Ok(LoggingType::OnChangeInterval),
            _ => Err(ModelError::InvalidCode {
                kind: "LoggingType",
                value: code,
            }),
        }
    }

    /// Whether this policy runs an interval timer
    pub fn uses_interval(&self) -> bool {
        matches!(self, LoggingType::Interval | LoggingType::OnChangeInterval)
    }
}

/// How an interval boundary value is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntervalLoggingType {
    /// Current value at the boundary
    #[default]
    Instant,
    Maximum,
    Minimum,
    Average,
}

impl IntervalLoggingType {
    pub fn code(&self) -> i32 {
        match self {
            IntervalLoggingType::Instant => 1,
            IntervalLoggingType::Maximum => 2,
            IntervalLoggingType::Minimum => 3,
            IntervalLoggingType::Average => 4,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            1 => Ok(IntervalLoggingType::Instant),
            2 => Ok(IntervalLoggingType::Maximum),
            3 => Ok(IntervalLoggingType::Minimum),
            4 => Ok(IntervalLoggingType::Average),
            _ => Err(ModelError::InvalidCode {
                kind: "IntervalLoggingType",
                value: code,
            }),
        }
    }
}

// ============================================================================
// Point Configuration
// ============================================================================

/// History-relevant configuration of one data point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPointConfig {
    pub id: PointId,
    /// Defaults to the point id when omitted
    #[serde(default)]
    pub series_id: Option<SeriesId>,
    #[serde(default)]
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub logging_type: LoggingType,
    /// Absolute change threshold for on-change logging of numeric points
    #[serde(default)]
    pub tolerance: f64,
    /// Interval logging period in milliseconds
    #[serde(default)]
    pub interval_logging_period_ms: u64,
    #[serde(default)]
    pub interval_logging_type: IntervalLoggingType,
    /// Align interval boundaries to multiples of the period
    #[serde(default)]
    pub quantize_intervals: bool,
    /// Cache size override; the service default applies when `None`
    #[serde(default)]
    pub default_cache_size: Option<usize>,
}

impl DataPointConfig {
    /// Create a point that logs on change with series id == point id
    pub fn new(id: PointId, data_type: DataType) -> Self {
        Self {
            id,
            series_id: None,
            name: format!("point-{}", id),
            data_type,
            logging_type: LoggingType::OnChange,
            tolerance: 0.0,
            interval_logging_period_ms: 0,
            interval_logging_type: IntervalLoggingType::Instant,
            quantize_intervals: false,
            default_cache_size: None,
        }
    }

    pub fn with_series_id(mut self, series_id: SeriesId) -> Self {
        self.series_id = Some(series_id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_logging(mut self, logging_type: LoggingType) -> Self {
        self.logging_type = logging_type;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_interval(mut self, period_ms: u64, kind: IntervalLoggingType) -> Self {
        self.interval_logging_period_ms = period_ms;
        self.interval_logging_type = kind;
        self
    }

    pub fn with_quantized_intervals(mut self, quantize: bool) -> Self {
        self.quantize_intervals = quantize;
        self
    }

    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.default_cache_size = Some(size);
        self
    }

    /// Series id used in the time-series store
    pub fn series_id(&self) -> SeriesId {
        self.series_id.unwrap_or(self.id)
    }

    /// Effective cache size given the service-wide default
    pub fn cache_size(&self, service_default: usize) -> usize {
        self.default_cache_size.unwrap_or(service_default)
    }

    /// Validate logging settings
    pub fn validate(&self) -> Result<()> {
        if self.tolerance.is_nan() || self.tolerance < 0.0 {
            return Err(ModelError::Validation(format!(
                "point {}: tolerance must be >= 0, got {}",
                self.id, self.tolerance
            )));
        }
        if self.logging_type.uses_interval() && self.interval_logging_period_ms == 0 {
            return Err(ModelError::Validation(format!(
                "point {}: {:?} logging requires a non-zero interval period",
                self.id, self.logging_type
            )));
        }
        Ok(())
    }
}
