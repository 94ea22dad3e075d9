//! Registration entity.

use chrono::{DateTime, Utc};
use common::{EventId, RegistrantId, RegistrationId};
use serde::{Deserialize, Serialize};

use crate::aggregate::EventSource;

use super::{RegistrationError, RegistrationEvent, RegistrationRef, RegistrationStatus};

/// What a cancellation released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancellation {
    /// Status held just before cancellation.
    pub previous_status: RegistrationStatus,

    /// Waitlist position released, if the registration was waitlisted.
    pub previous_position: Option<u32>,
}

impl Cancellation {
    /// Returns true if the cancellation freed a seat.
    pub fn freed_seat(&self) -> bool {
        self.previous_status == RegistrationStatus::Confirmed
    }
}

/// A registrant's registration for one scheduled event.
///
/// `position_in_queue` is set exactly when the status is Waitlisted. Every
/// transition records a [`RegistrationEvent`] that stays on the entity until
/// drained through [`EventSource::take_events`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    id: RegistrationId,
    event_id: EventId,
    registrant_id: RegistrantId,
    status: RegistrationStatus,
    position_in_queue: Option<u32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,

    #[serde(skip)]
    pending_events: Vec<RegistrationEvent>,
}

// Constructors
impl Registration {
    /// Creates a registration that holds a seat.
    pub fn confirmed(event_id: EventId, registrant_id: RegistrantId, now: DateTime<Utc>) -> Self {
        let mut registration = Self::blank(
            event_id,
            registrant_id,
            RegistrationStatus::Confirmed,
            None,
            now,
        );
        let subject = registration.subject();
        registration.record(RegistrationEvent::confirmed(subject, now));
        registration
    }

    /// Creates a registration at the given waitlist position.
    pub fn waitlisted(
        event_id: EventId,
        registrant_id: RegistrantId,
        position: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, RegistrationError> {
        if position == 0 {
            return Err(RegistrationError::InvalidPosition { position });
        }

        let mut registration = Self::blank(
            event_id,
            registrant_id,
            RegistrationStatus::Waitlisted,
            Some(position),
            now,
        );
        let subject = registration.subject();
        registration.record(RegistrationEvent::waitlisted(subject, position, now));
        Ok(registration)
    }

    /// Rebuilds a registration from stored fields, with no pending events.
    pub fn restore(
        id: RegistrationId,
        event_id: EventId,
        registrant_id: RegistrantId,
        status: RegistrationStatus,
        position_in_queue: Option<u32>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event_id,
            registrant_id,
            status,
            position_in_queue,
            created_at,
            updated_at,
            pending_events: Vec::new(),
        }
    }

    fn blank(
        event_id: EventId,
        registrant_id: RegistrantId,
        status: RegistrationStatus,
        position_in_queue: Option<u32>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::restore(
            RegistrationId::new(),
            event_id,
            registrant_id,
            status,
            position_in_queue,
            now,
            now,
        )
    }
}

// Query methods
impl Registration {
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn registrant_id(&self) -> RegistrantId {
        self.registrant_id
    }

    pub fn status(&self) -> RegistrationStatus {
        self.status
    }

    /// Returns the 1-based waitlist position; `None` unless waitlisted.
    pub fn position_in_queue(&self) -> Option<u32> {
        self.position_in_queue
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_waitlisted(&self) -> bool {
        self.status == RegistrationStatus::Waitlisted
    }

    /// Returns the identifying triple carried by every event.
    pub fn subject(&self) -> RegistrationRef {
        RegistrationRef {
            registration_id: self.id,
            event_id: self.event_id,
            registrant_id: self.registrant_id,
        }
    }

    /// Returns a copy without the pending events, as persisted.
    pub fn detached(&self) -> Self {
        Self {
            pending_events: Vec::new(),
            ..self.clone()
        }
    }
}

// Transition methods (record events)
impl Registration {
    /// Cancels the registration.
    ///
    /// Returns `None` when it was already cancelled; nothing is recorded then.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Option<Cancellation> {
        if !self.status.can_cancel() {
            return None;
        }

        let cancellation = Cancellation {
            previous_status: self.status,
            previous_position: self.position_in_queue,
        };

        self.status = RegistrationStatus::Cancelled;
        self.position_in_queue = None;
        self.updated_at = now;

        let subject = self.subject();
        self.record(RegistrationEvent::cancelled(
            subject,
            cancellation.previous_status,
            cancellation.previous_position,
            now,
        ));

        Some(cancellation)
    }

    /// Moves a waitlisted registration into a seat.
    ///
    /// Returns the position it held.
    pub fn promote(&mut self, now: DateTime<Utc>) -> Result<u32, RegistrationError> {
        let previous_position = self.waitlist_position("promote")?;

        self.status = RegistrationStatus::Confirmed;
        self.position_in_queue = None;
        self.updated_at = now;

        let subject = self.subject();
        self.record(RegistrationEvent::promoted(subject, previous_position, now));

        Ok(previous_position)
    }

    /// Moves a waitlisted registration one place toward the front.
    ///
    /// Returns the new position.
    pub fn move_up(&mut self, now: DateTime<Utc>) -> Result<u32, RegistrationError> {
        let previous_position = self.waitlist_position("move up")?;
        if previous_position <= 1 {
            return Err(RegistrationError::InvalidPosition {
                position: previous_position - 1,
            });
        }

        let new_position = previous_position - 1;
        self.position_in_queue = Some(new_position);
        self.updated_at = now;

        let subject = self.subject();
        self.record(RegistrationEvent::position_changed(
            subject,
            previous_position,
            new_position,
            now,
        ));

        Ok(new_position)
    }

    fn waitlist_position(&self, action: &'static str) -> Result<u32, RegistrationError> {
        match (self.status, self.position_in_queue) {
            (RegistrationStatus::Waitlisted, Some(position)) => Ok(position),
            (current_state, _) => Err(RegistrationError::InvalidStateTransition {
                current_state,
                action,
            }),
        }
    }

    fn record(&mut self, event: RegistrationEvent) {
        self.pending_events.push(event);
    }
}

impl EventSource for Registration {
    type Event = RegistrationEvent;

    fn pending_events(&self) -> &[RegistrationEvent] {
        &self.pending_events
    }

    fn take_events(&mut self) -> Vec<RegistrationEvent> {
        std::mem::take(&mut self.pending_events)
    }
}
