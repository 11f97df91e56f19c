//! Model Layer Error Types

use thiserror::Error;

/// Result type for voltage-model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Model layer errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    /// Unknown enum code read from storage or configuration
    #[error("Invalid {kind} value: {value}")]
    InvalidCode { kind: &'static str, value: i32 },

    /// Data value does not match the point's data type
    #[error("Data type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: DataTypeName, got: DataTypeName },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Static data type name used in error messages
pub type DataTypeName = &'static str;
