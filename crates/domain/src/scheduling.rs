//! Reference data that registrations point at.

use chrono::{DateTime, Utc};
use common::{EventId, RegistrantId};
use serde::{Deserialize, Serialize};

/// A scheduled event with a seat ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub id: EventId,
    pub title: String,

    /// Maximum number of Confirmed registrations.
    pub capacity: u32,

    pub published: bool,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl ScheduledEvent {
    /// Creates an unpublished event.
    pub fn new(
        title: impl Into<String>,
        capacity: u32,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            title: title.into(),
            capacity,
            published: false,
            starts_at,
            ends_at,
        }
    }

    /// Marks the event as published.
    pub fn published(mut self) -> Self {
        self.published = true;
        self
    }

    /// Registration is open while the event is published and has not ended.
    pub fn is_open_for_registration(&self, now: DateTime<Utc>) -> bool {
        self.published && now < self.ends_at
    }
}

/// Someone who can register for events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registrant {
    pub id: RegistrantId,

    /// Stable external identity, e.g. an account reference.
    pub identity: String,
}

impl Registrant {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            id: RegistrantId::new(),
            identity: identity.into(),
        }
    }
}
