//! Error types for counter store operations.

use thiserror::Error;

/// Errors produced by counter store providers.
#[derive(Debug, Error)]
pub enum CounterStoreError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Operation '{operation}' failed: {message}")]
    OperationFailed { operation: String, message: String },

    #[error("Value at key '{key}' has unexpected type")]
    WrongType { key: String },

    #[error("Invalid key pattern: {pattern}")]
    InvalidPattern { pattern: String },
}

impl CounterStoreError {
    /// Check if the error is transient and the operation should be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } => true,
            Self::OperationFailed { .. } => true,
            Self::WrongType { .. } => false,
            Self::InvalidPattern { .. } => false,
        }
    }

    /// Wrap a provider error for a named operation.
    pub fn operation(operation: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            message: source.to_string(),
        }
    }
}

impl From<redis::RedisError> for CounterStoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            Self::ConnectionFailed {
                message: err.to_string(),
            }
        } else {
            Self::OperationFailed {
                operation: err.code().unwrap_or("redis").to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
