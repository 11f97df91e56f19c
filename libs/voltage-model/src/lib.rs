//! Voltage Model Library
//!
//! Core domain types shared by the history stack:
//!
//! - `value`: data values and timestamped samples (`PointValueTime`)
//! - `point`: data point configuration and logging policy
//! - `event`: alarm/event instances, alarm levels, return causes
//!
//! All timestamps are milliseconds since the Unix epoch (`i64`).

pub mod error;
pub mod event;
pub mod point;
pub mod value;

pub use error::{ModelError, Result};
pub use event::{AlarmLevel, EventInstance, ReturnCause, UserId};
pub use point::{DataPointConfig, IntervalLoggingType, LoggingType, PointId, SeriesId};
pub use value::{DataType, DataValue, PointValueTime, SetPointSource, TimeOrder};
