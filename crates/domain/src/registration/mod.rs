//! Registration entity and related types.

mod aggregate;
mod events;
mod state;

pub use aggregate::{Cancellation, Registration};
pub use events::{
    RegistrationCancelledData, RegistrationConfirmedData, RegistrationEvent,
    RegistrationPromotedData, RegistrationRef, RegistrationWaitlistedData,
    WaitlistPositionChangedData, event_types,
};
pub use state::RegistrationStatus;

use thiserror::Error;

/// Errors raised by rule violations on a single registration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The registration is not in a status that allows the action.
    #[error("Invalid state transition: cannot {action} a {current_state} registration")]
    InvalidStateTransition {
        current_state: RegistrationStatus,
        action: &'static str,
    },

    /// A waitlist position outside the 1-based range was requested.
    #[error("Invalid waitlist position: {position}")]
    InvalidPosition { position: u32 },

    /// A stored status string did not match any known status.
    #[error("Unknown registration status: {0}")]
    UnknownStatus(String),
}
