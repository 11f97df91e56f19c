//! Migration Error Types

use std::time::Duration;
use thiserror::Error;
use voltage_model::SeriesId;
use voltage_rtdb::RtdbError;

use crate::series::MigrationStatus;

/// Result type for migration operations
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Migration errors
///
/// Three classes: transient store/database failures are retried,
/// data errors fail the series immediately, and invariant violations are
/// fatal to the worker that hit them.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Time-series store error
    #[error("Store error: {0}")]
    Store(#[from] RtdbError),

    /// Progress database error
    #[error("Database error: {0}")]
    Database(String),

    /// Operation not supported while the series is migrating
    #[error("Unsupported during migration of series {series_id}: {operation}")]
    Unsupported {
        series_id: SeriesId,
        operation: String,
    },

    /// Status change not allowed by the series state machine
    #[error("Illegal transition for series {series_id}: {from} -> {to}")]
    IllegalTransition {
        series_id: SeriesId,
        from: MigrationStatus,
        to: MigrationStatus,
    },

    /// Two workers processed the same series at once
    #[error("Series {0} is already being processed")]
    ConcurrentPass(SeriesId),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Engine was started twice
    #[error("Migration already started")]
    AlreadyStarted,

    /// Worker task panicked or was cancelled
    #[error("Worker failed: {0}")]
    Worker(String),

    /// Workers did not stop within the close wait
    #[error("Workers did not stop within {0:?}")]
    ShutdownTimeout(Duration),
}

impl MigrationError {
    /// Transient failure, the series is requeued
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrationError::Store(e) => e.is_transient(),
            MigrationError::Database(_) => true,
            _ => false,
        }
    }

    /// Invariant violation, the worker terminates
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MigrationError::IllegalTransition { .. } | MigrationError::ConcurrentPass(_)
        )
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        MigrationError::Database(err.to_string())
    }
}

impl From<MigrationError> for RtdbError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::Store(e) => e,
            MigrationError::Unsupported { operation, .. } => RtdbError::Unsupported(operation),
            other => RtdbError::Other(anyhow::Error::new(other)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let transient = MigrationError::Store(RtdbError::store(1, "timeout"));
        assert!(transient.is_retryable());
        assert!(!transient.is_fatal());

        let data = MigrationError::Store(RtdbError::PointNotFound(1));
        assert!(!data.is_retryable());

        let fatal = MigrationError::IllegalTransition {
            series_id: 1,
            from: MigrationStatus::NotStarted,
            to: MigrationStatus::Migrated,
        };
        assert!(fatal.is_fatal());
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn test_unsupported_maps_to_rtdb_unsupported() {
        let err: RtdbError = MigrationError::Unsupported {
            series_id: 3,
            operation: "delete".into(),
        }
        .into();
        assert!(matches!(err, RtdbError::Unsupported(op) if op == "delete"));
    }

    #[test]
    fn test_display() {
        let err = MigrationError::IllegalTransition {
            series_id: 9,
            from: MigrationStatus::Migrated,
            to: MigrationStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "Illegal transition for series 9: MIGRATED -> RUNNING"
        );
    }
}
