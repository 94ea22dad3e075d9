//! Allocator commands.

use common::{EventId, RegistrantId, RegistrationId};
use serde::{Deserialize, Serialize};

/// Command to register a registrant for an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Register {
    pub event_id: EventId,
    pub registrant_id: RegistrantId,
}

impl Register {
    pub fn new(event_id: EventId, registrant_id: RegistrantId) -> Self {
        Self {
            event_id,
            registrant_id,
        }
    }
}

/// Command to cancel a registration. Cancelling twice is a no-op.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cancel {
    pub registration_id: RegistrationId,
}

impl Cancel {
    pub fn new(registration_id: RegistrationId) -> Self {
        Self { registration_id }
    }
}

/// Command to move the head of an event's waitlist into a free seat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Promote {
    pub event_id: EventId,
}

impl Promote {
    pub fn new(event_id: EventId) -> Self {
        Self { event_id }
    }
}

/// Command to admit one specific waitlisted registration, out of queue order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Confirm {
    pub registration_id: RegistrationId,
}

impl Confirm {
    pub fn new(registration_id: RegistrationId) -> Self {
        Self { registration_id }
    }
}

/// Command to raise an event's capacity and fill the new seats from the waitlist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IncreaseCapacity {
    pub event_id: EventId,
    pub new_capacity: u32,
}

impl IncreaseCapacity {
    pub fn new(event_id: EventId, new_capacity: u32) -> Self {
        Self {
            event_id,
            new_capacity,
        }
    }
}
