//! Domain layer for capacity-bounded event registration.
//!
//! This crate provides:
//! - [`ScheduledEvent`] and [`Registrant`], the reference data registrations point at
//! - [`Registration`], the entity whose status and waitlist position the allocator mutates
//! - [`RegistrationEvent`], the typed record of every state change
//! - [`DomainEvent`] and [`EventSource`], the seams the dispatcher drains through

pub mod aggregate;
pub mod registration;
pub mod scheduling;

pub use aggregate::{DomainEvent, EventSource};
pub use registration::{
    Cancellation, Registration, RegistrationCancelledData, RegistrationConfirmedData,
    RegistrationError, RegistrationEvent, RegistrationPromotedData, RegistrationRef,
    RegistrationStatus, RegistrationWaitlistedData, WaitlistPositionChangedData, event_types,
};
pub use scheduling::{Registrant, ScheduledEvent};
