use common::{EventId, RegistrantId};
use thiserror::Error;

/// Errors that can occur when interacting with the registration store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The registrant already holds a non-cancelled registration for the event.
    #[error("Registrant {registrant_id} already has an active registration for event {event_id}")]
    DuplicateActiveRegistration {
        event_id: EventId,
        registrant_id: RegistrantId,
    },

    /// The backend is temporarily unavailable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be mapped back into the domain model.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
