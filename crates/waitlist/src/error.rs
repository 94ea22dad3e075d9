use common::{EventId, RegistrantId, RegistrationId};
use domain::RegistrationError;
use store::StoreError;
use thiserror::Error;

/// Errors returned by allocator commands.
#[derive(Debug, Error)]
pub enum WaitlistError {
    /// The registrant already holds a non-cancelled registration for the event.
    #[error("Registrant {registrant_id} already has an active registration for event {event_id}")]
    Conflict {
        event_id: EventId,
        registrant_id: RegistrantId,
    },

    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    #[error("Registrant not found: {0}")]
    RegistrantNotFound(RegistrantId),

    #[error("Registration not found: {0}")]
    RegistrationNotFound(RegistrationId),

    /// The registration's status does not allow the command.
    #[error("Invalid state: {0}")]
    InvalidState(#[from] RegistrationError),

    /// The event is unpublished or has already ended.
    #[error("Registration is closed for event {0}")]
    RegistrationClosed(EventId),

    /// An explicit promotion found every seat taken.
    #[error("No free seat for event {event_id} (capacity {capacity})")]
    CapacityExhausted { event_id: EventId, capacity: u32 },

    #[error("Capacity of event {event_id} cannot shrink from {current} to {requested}")]
    InvalidCapacity {
        event_id: EventId,
        current: u32,
        requested: u32,
    },

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for WaitlistError {
    fn from(e: StoreError) -> Self {
        match e {
            // A racing insert that slipped past the in-lock check still surfaces as a conflict
            StoreError::DuplicateActiveRegistration {
                event_id,
                registrant_id,
            } => WaitlistError::Conflict {
                event_id,
                registrant_id,
            },
            other => WaitlistError::Store(other),
        }
    }
}

/// Result type for allocator commands.
pub type Result<T> = std::result::Result<T, WaitlistError>;
