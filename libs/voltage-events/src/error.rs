//! Event cache error types

use thiserror::Error;
use voltage_model::UserId;

pub type Result<T> = std::result::Result<T, EventError>;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Event store error: {0}")]
    Store(String),

    #[error("Listener for user {user_id} failed: {message}")]
    Listener { user_id: UserId, message: String },

    /// Every listener was called; these are the ones that failed
    #[error("{} event listener(s) failed", .0.len())]
    Dispatch(Vec<EventError>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EventError {
    pub fn listener(user_id: UserId, message: impl Into<String>) -> Self {
        EventError::Listener {
            user_id,
            message: message.into(),
        }
    }

    /// Individual failures of a dispatch, or the error itself
    pub fn failures(&self) -> &[EventError] {
        match self {
            EventError::Dispatch(errors) => errors,
            other => std::slice::from_ref(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_display_counts_failures() {
        let err = EventError::Dispatch(vec![
            EventError::listener(1, "closed"),
            EventError::listener(2, "closed"),
        ]);
        assert_eq!(err.to_string(), "2 event listener(s) failed");
        assert_eq!(err.failures().len(), 2);
    }

    #[test]
    fn test_single_error_failures() {
        let err = EventError::Store("offline".to_string());
        assert_eq!(err.failures().len(), 1);
    }
}
