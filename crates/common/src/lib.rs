//! Shared types for the registration system.

pub mod shutdown;
pub mod types;

pub use shutdown::{ShutdownSignal, ShutdownTrigger, shutdown_channel};
pub use types::{EventId, MessageId, RegistrantId, RegistrationId};
