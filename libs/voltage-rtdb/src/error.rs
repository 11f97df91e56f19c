//! Error types for voltage-rtdb

use thiserror::Error;
use voltage_model::{ModelError, PointId, SeriesId};

#[derive(Error, Debug)]
pub enum RtdbError {
    #[error("Store error on series {series_id}: {message}")]
    Store { series_id: SeriesId, message: String },

    #[error("Point not found: {0}")]
    PointNotFound(PointId),

    #[error("Point already running: {0}")]
    PointAlreadyRunning(PointId),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RtdbError {
    pub fn store(series_id: SeriesId, message: impl Into<String>) -> Self {
        RtdbError::Store {
            series_id,
            message: message.into(),
        }
    }

    /// Transient store failures may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, RtdbError::Store { .. } | RtdbError::Other(_))
    }
}

pub type Result<T> = std::result::Result<T, RtdbError>;
