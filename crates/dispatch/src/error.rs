//! Dispatch error types.

use thiserror::Error;

/// Failure reported by an event handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler may succeed if called again.
    #[error("Retryable handler failure: {0}")]
    Retryable(String),

    /// Calling the handler again cannot succeed.
    #[error("Permanent handler failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        HandlerError::Retryable(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        HandlerError::Permanent(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Retryable(_))
    }
}

/// Errors that can occur while routing or processing events.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The queue or another piece of infrastructure is temporarily unavailable.
    #[error("Transient infrastructure error: {0}")]
    Transient(String),

    /// A synchronously invoked handler failed.
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
