//! Registration domain events.

use chrono::{DateTime, Utc};
use common::{EventId, RegistrantId, RegistrationId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::DomainEvent;

use super::RegistrationStatus;

/// Event type names, used when registering handlers.
pub mod event_types {
    pub const REGISTRATION_CONFIRMED: &str = "RegistrationConfirmed";
    pub const REGISTRATION_WAITLISTED: &str = "RegistrationWaitlisted";
    pub const REGISTRATION_PROMOTED: &str = "RegistrationPromoted";
    pub const REGISTRATION_CANCELLED: &str = "RegistrationCancelled";
    pub const WAITLIST_POSITION_CHANGED: &str = "WaitlistPositionChanged";
}

/// Events raised by a registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RegistrationEvent {
    /// Registration was admitted directly into a free seat.
    RegistrationConfirmed(RegistrationConfirmedData),

    /// Registration joined the waitlist.
    RegistrationWaitlisted(RegistrationWaitlistedData),

    /// Waitlisted registration was moved into a seat.
    RegistrationPromoted(RegistrationPromotedData),

    /// Registration was cancelled.
    RegistrationCancelled(RegistrationCancelledData),

    /// Waitlisted registration moved up after a gap closed ahead of it.
    WaitlistPositionChanged(WaitlistPositionChangedData),
}

/// Identifies the registration an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRef {
    pub registration_id: RegistrationId,
    pub event_id: EventId,
    pub registrant_id: RegistrantId,
}

/// Data for RegistrationConfirmed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfirmedData {
    pub subject: RegistrationRef,
    pub occurred_at: DateTime<Utc>,
}

/// Data for RegistrationWaitlisted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationWaitlistedData {
    pub subject: RegistrationRef,

    /// 1-based position assigned on joining.
    pub position: u32,

    pub occurred_at: DateTime<Utc>,
}

/// Data for RegistrationPromoted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationPromotedData {
    pub subject: RegistrationRef,

    /// Position held just before promotion.
    pub previous_position: u32,

    pub occurred_at: DateTime<Utc>,
}

/// Data for RegistrationCancelled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationCancelledData {
    pub subject: RegistrationRef,

    /// Status held just before cancellation.
    pub previous_status: RegistrationStatus,

    /// Waitlist position released by the cancellation, if any.
    pub previous_position: Option<u32>,

    pub occurred_at: DateTime<Utc>,
}

/// Data for WaitlistPositionChanged event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitlistPositionChangedData {
    pub subject: RegistrationRef,
    pub previous_position: u32,
    pub new_position: u32,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent for RegistrationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RegistrationEvent::RegistrationConfirmed(_) => event_types::REGISTRATION_CONFIRMED,
            RegistrationEvent::RegistrationWaitlisted(_) => event_types::REGISTRATION_WAITLISTED,
            RegistrationEvent::RegistrationPromoted(_) => event_types::REGISTRATION_PROMOTED,
            RegistrationEvent::RegistrationCancelled(_) => event_types::REGISTRATION_CANCELLED,
            RegistrationEvent::WaitlistPositionChanged(_) => {
                event_types::WAITLIST_POSITION_CHANGED
            }
        }
    }

    fn aggregate_type(&self) -> &'static str {
        "Registration"
    }

    fn aggregate_id(&self) -> Uuid {
        self.subject().registration_id.as_uuid()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RegistrationEvent::RegistrationConfirmed(data) => data.occurred_at,
            RegistrationEvent::RegistrationWaitlisted(data) => data.occurred_at,
            RegistrationEvent::RegistrationPromoted(data) => data.occurred_at,
            RegistrationEvent::RegistrationCancelled(data) => data.occurred_at,
            RegistrationEvent::WaitlistPositionChanged(data) => data.occurred_at,
        }
    }

    fn is_integration_event(&self) -> bool {
        !matches!(self, RegistrationEvent::WaitlistPositionChanged(_))
    }
}

impl RegistrationEvent {
    /// Returns the registration the event is about.
    pub fn subject(&self) -> &RegistrationRef {
        match self {
            RegistrationEvent::RegistrationConfirmed(data) => &data.subject,
            RegistrationEvent::RegistrationWaitlisted(data) => &data.subject,
            RegistrationEvent::RegistrationPromoted(data) => &data.subject,
            RegistrationEvent::RegistrationCancelled(data) => &data.subject,
            RegistrationEvent::WaitlistPositionChanged(data) => &data.subject,
        }
    }
}

// Convenience constructors for events
impl RegistrationEvent {
    /// Creates a RegistrationConfirmed event.
    pub fn confirmed(subject: RegistrationRef, occurred_at: DateTime<Utc>) -> Self {
        RegistrationEvent::RegistrationConfirmed(RegistrationConfirmedData {
            subject,
            occurred_at,
        })
    }

    /// Creates a RegistrationWaitlisted event.
    pub fn waitlisted(subject: RegistrationRef, position: u32, occurred_at: DateTime<Utc>) -> Self {
        RegistrationEvent::RegistrationWaitlisted(RegistrationWaitlistedData {
            subject,
            position,
            occurred_at,
        })
    }

    /// Creates a RegistrationPromoted event.
    pub fn promoted(
        subject: RegistrationRef,
        previous_position: u32,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        RegistrationEvent::RegistrationPromoted(RegistrationPromotedData {
            subject,
            previous_position,
            occurred_at,
        })
    }

    /// Creates a RegistrationCancelled event.
    pub fn cancelled(
        subject: RegistrationRef,
        previous_status: RegistrationStatus,
        previous_position: Option<u32>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        RegistrationEvent::RegistrationCancelled(RegistrationCancelledData {
            subject,
            previous_status,
            previous_position,
            occurred_at,
        })
    }

    /// Creates a WaitlistPositionChanged event.
    pub fn position_changed(
        subject: RegistrationRef,
        previous_position: u32,
        new_position: u32,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        RegistrationEvent::WaitlistPositionChanged(WaitlistPositionChangedData {
            subject,
            previous_position,
            new_position,
            occurred_at,
        })
    }
}
