use store::StoreError;
use thiserror::Error;

/// Failure to publish to the external bus. Always treated as transient.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("Bus unavailable: {0}")]
    Unavailable(String),

    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// Errors that can occur while processing the outbox.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
