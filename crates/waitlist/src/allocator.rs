//! The waitlist position allocator.
//!
//! Every command runs inside one store transaction that first enters the
//! event's critical section, so the count-then-write sequences below never
//! interleave with another command on the same event. Integration events
//! recorded by the touched registrations are staged in the outbox before
//! commit, so they persist exactly when the registration changes do.

use chrono::{DateTime, Utc};
use common::EventId;
use domain::{DomainEvent, EventSource, Registration, ScheduledEvent};
use store::{OutboxMessage, RegistrationStore, RegistrationTx};

use crate::commands::{Cancel, Confirm, IncreaseCapacity, Promote, Register};
use crate::error::{Result, WaitlistError};

/// Registrations changed by one allocator command.
///
/// Each registration still carries the events it recorded; hand them to the
/// dispatcher once the command has returned.
#[derive(Debug, Default)]
pub struct Allocation {
    /// The registration the command targeted, if any.
    pub registration: Option<Registration>,

    /// Registrations changed as a consequence, in the order they changed.
    pub affected: Vec<Registration>,
}

impl Allocation {
    fn targeted(registration: Registration, affected: Vec<Registration>) -> Self {
        Self {
            registration: Some(registration),
            affected,
        }
    }

    /// Returns true if the command changed nothing.
    pub fn is_noop(&self) -> bool {
        self.affected.is_empty()
            && self
                .registration
                .as_ref()
                .is_none_or(|r| !r.has_pending_events())
    }

    /// Returns every changed registration, target first.
    pub fn into_registrations(self) -> Vec<Registration> {
        self.registration.into_iter().chain(self.affected).collect()
    }
}

/// Sole writer of capacity and waitlist position state.
pub struct WaitlistAllocator<S: RegistrationStore> {
    store: S,
}

impl<S: RegistrationStore> WaitlistAllocator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Registers a registrant, confirming them if a seat is free and
    /// appending them to the waitlist otherwise.
    #[tracing::instrument(skip(self))]
    pub async fn register(&self, cmd: Register) -> Result<Allocation> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let event = lock_existing_event(&mut tx, cmd.event_id).await?;

        if !tx.registrant_exists(cmd.registrant_id).await? {
            return Err(WaitlistError::RegistrantNotFound(cmd.registrant_id));
        }
        if tx
            .find_active_registration(cmd.event_id, cmd.registrant_id)
            .await?
            .is_some()
        {
            return Err(WaitlistError::Conflict {
                event_id: cmd.event_id,
                registrant_id: cmd.registrant_id,
            });
        }
        if !event.is_open_for_registration(now) {
            return Err(WaitlistError::RegistrationClosed(cmd.event_id));
        }

        let confirmed = tx.count_confirmed(event.id).await?;
        let registration = if confirmed < event.capacity {
            Registration::confirmed(event.id, cmd.registrant_id, now)
        } else {
            let position = tx.waitlist(event.id).await?.len() as u32 + 1;
            Registration::waitlisted(event.id, cmd.registrant_id, position, now)?
        };

        tx.insert_registration(&registration).await?;
        stage_outbox(&mut tx, std::slice::from_ref(&registration)).await?;
        tx.commit().await?;

        metrics::counter!(
            "waitlist_registrations_total",
            "status" => registration.status().as_str()
        )
        .increment(1);
        tracing::info!(
            registration_id = %registration.id(),
            status = %registration.status(),
            position = ?registration.position_in_queue(),
            "Registration created"
        );

        Ok(Allocation::targeted(registration, Vec::new()))
    }

    /// Cancels a registration and repairs the event's seat and queue state.
    ///
    /// A freed seat goes to the head of the waitlist; a released waitlist
    /// position is closed by moving everyone behind it up by one.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, cmd: Cancel) -> Result<Allocation> {
        let now = Utc::now();
        let event_id = self
            .store
            .get_registration(cmd.registration_id)
            .await?
            .ok_or(WaitlistError::RegistrationNotFound(cmd.registration_id))?
            .event_id();

        let mut tx = self.store.begin().await?;
        let event = lock_existing_event(&mut tx, event_id).await?;
        let mut registration = tx
            .get_registration(cmd.registration_id)
            .await?
            .ok_or(WaitlistError::RegistrationNotFound(cmd.registration_id))?;

        let Some(cancellation) = registration.cancel(now) else {
            tx.rollback().await?;
            tracing::debug!(registration_id = %cmd.registration_id, "Already cancelled");
            return Ok(Allocation::targeted(registration, Vec::new()));
        };
        tx.update_registration(&registration).await?;

        let affected = match cancellation.previous_position {
            Some(position) => close_gap(&mut tx, event_id, position, now).await?,
            None if cancellation.freed_seat() => promote_if_seat_free(&mut tx, &event, now).await?,
            None => Vec::new(),
        };

        stage_outbox(&mut tx, std::slice::from_ref(&registration)).await?;
        stage_outbox(&mut tx, &affected).await?;
        tx.commit().await?;

        metrics::counter!("waitlist_cancellations_total").increment(1);
        if cancellation.freed_seat() && !affected.is_empty() {
            metrics::counter!("waitlist_promotions_total").increment(1);
        }
        tracing::info!(
            registration_id = %registration.id(),
            previous_status = %cancellation.previous_status,
            affected = affected.len(),
            "Registration cancelled"
        );

        Ok(Allocation::targeted(registration, affected))
    }

    /// Moves the lowest-positioned waitlisted registration into a seat.
    ///
    /// No-op on an empty waitlist. Fails with `CapacityExhausted` if every
    /// seat is taken.
    #[tracing::instrument(skip(self))]
    pub async fn promote(&self, cmd: Promote) -> Result<Allocation> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let event = lock_existing_event(&mut tx, cmd.event_id).await?;

        if tx.waitlist(event.id).await?.is_empty() {
            tx.rollback().await?;
            return Ok(Allocation::default());
        }
        if tx.count_confirmed(event.id).await? >= event.capacity {
            return Err(WaitlistError::CapacityExhausted {
                event_id: event.id,
                capacity: event.capacity,
            });
        }

        let changed = promote_head(&mut tx, event.id, now).await?;
        stage_outbox(&mut tx, &changed).await?;
        tx.commit().await?;

        metrics::counter!("waitlist_promotions_total").increment(1);

        let mut changed = changed.into_iter();
        let Some(promoted) = changed.next() else {
            return Ok(Allocation::default());
        };
        tracing::info!(registration_id = %promoted.id(), "Waitlist head promoted");
        Ok(Allocation::targeted(promoted, changed.collect()))
    }

    /// Admits one specific waitlisted registration, ahead of queue order.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, cmd: Confirm) -> Result<Allocation> {
        let now = Utc::now();
        let event_id = self
            .store
            .get_registration(cmd.registration_id)
            .await?
            .ok_or(WaitlistError::RegistrationNotFound(cmd.registration_id))?
            .event_id();

        let mut tx = self.store.begin().await?;
        let event = lock_existing_event(&mut tx, event_id).await?;
        let mut registration = tx
            .get_registration(cmd.registration_id)
            .await?
            .ok_or(WaitlistError::RegistrationNotFound(cmd.registration_id))?;

        let previous_position = registration.promote(now)?;
        if tx.count_confirmed(event.id).await? >= event.capacity {
            return Err(WaitlistError::CapacityExhausted {
                event_id: event.id,
                capacity: event.capacity,
            });
        }
        tx.update_registration(&registration).await?;

        let affected = close_gap(&mut tx, event.id, previous_position, now).await?;
        stage_outbox(&mut tx, std::slice::from_ref(&registration)).await?;
        stage_outbox(&mut tx, &affected).await?;
        tx.commit().await?;

        metrics::counter!("waitlist_promotions_total").increment(1);
        tracing::info!(
            registration_id = %registration.id(),
            previous_position,
            "Waitlisted registration confirmed"
        );

        Ok(Allocation::targeted(registration, affected))
    }

    /// Raises an event's capacity, then promotes from the waitlist one
    /// registrant at a time until the seats or the waitlist run out.
    ///
    /// Each promotion is its own transaction, so other commands on the event
    /// may interleave between steps.
    #[tracing::instrument(skip(self))]
    pub async fn increase_capacity(&self, cmd: IncreaseCapacity) -> Result<Allocation> {
        let mut tx = self.store.begin().await?;
        let event = lock_existing_event(&mut tx, cmd.event_id).await?;

        if cmd.new_capacity < event.capacity {
            return Err(WaitlistError::InvalidCapacity {
                event_id: event.id,
                current: event.capacity,
                requested: cmd.new_capacity,
            });
        }
        if cmd.new_capacity > event.capacity {
            tx.update_capacity(event.id, cmd.new_capacity).await?;
            tx.commit().await?;
            tracing::info!(
                from = event.capacity,
                to = cmd.new_capacity,
                "Event capacity increased"
            );
        } else {
            tx.rollback().await?;
        }

        let mut allocation = Allocation::default();
        while let Some(changed) = self.promote_step(event.id).await? {
            allocation.affected.extend(changed);
        }
        Ok(allocation)
    }

    /// Lists every registration of an event, oldest first.
    pub async fn registrations(&self, event_id: EventId) -> Result<Vec<Registration>> {
        if self.store.get_event(event_id).await?.is_none() {
            return Err(WaitlistError::EventNotFound(event_id));
        }
        Ok(self.store.list_registrations(event_id).await?)
    }

    /// Promotes the waitlist head if a seat is free. `None` when nothing changed.
    async fn promote_step(&self, event_id: EventId) -> Result<Option<Vec<Registration>>> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let event = lock_existing_event(&mut tx, event_id).await?;

        let changed = promote_if_seat_free(&mut tx, &event, now).await?;
        if changed.is_empty() {
            tx.rollback().await?;
            return Ok(None);
        }

        stage_outbox(&mut tx, &changed).await?;
        tx.commit().await?;

        metrics::counter!("waitlist_promotions_total").increment(1);
        Ok(Some(changed))
    }
}

async fn lock_existing_event<T: RegistrationTx>(
    tx: &mut T,
    event_id: EventId,
) -> Result<ScheduledEvent> {
    tx.lock_event(event_id)
        .await?
        .ok_or(WaitlistError::EventNotFound(event_id))
}

/// Promotes the waitlist head when a seat is free; empty when nothing changed.
async fn promote_if_seat_free<T: RegistrationTx>(
    tx: &mut T,
    event: &ScheduledEvent,
    now: DateTime<Utc>,
) -> Result<Vec<Registration>> {
    if tx.count_confirmed(event.id).await? >= event.capacity {
        return Ok(Vec::new());
    }
    promote_head(tx, event.id, now).await
}

/// Confirms the lowest position and moves every other waitlisted
/// registration up by one. Returns the promoted registration first.
async fn promote_head<T: RegistrationTx>(
    tx: &mut T,
    event_id: EventId,
    now: DateTime<Utc>,
) -> Result<Vec<Registration>> {
    let mut waitlist = tx.waitlist(event_id).await?.into_iter();
    let Some(mut head) = waitlist.next() else {
        return Ok(Vec::new());
    };

    head.promote(now)?;
    tx.update_registration(&head).await?;

    let mut changed = vec![head];
    for mut registration in waitlist {
        registration.move_up(now)?;
        tx.update_registration(&registration).await?;
        changed.push(registration);
    }
    Ok(changed)
}

/// Moves every waitlisted registration behind `released` up by one.
async fn close_gap<T: RegistrationTx>(
    tx: &mut T,
    event_id: EventId,
    released: u32,
    now: DateTime<Utc>,
) -> Result<Vec<Registration>> {
    let mut changed = Vec::new();
    for mut registration in tx.waitlist(event_id).await? {
        if registration.position_in_queue().is_some_and(|p| p > released) {
            registration.move_up(now)?;
            tx.update_registration(&registration).await?;
            changed.push(registration);
        }
    }
    Ok(changed)
}

/// Writes an outbox row for every integration event the registrations recorded.
async fn stage_outbox<T: RegistrationTx>(tx: &mut T, registrations: &[Registration]) -> Result<()> {
    for registration in registrations {
        for event in registration
            .pending_events()
            .iter()
            .filter(|e| e.is_integration_event())
        {
            tx.insert_outbox_message(&OutboxMessage::from_event(event)?)
                .await?;
        }
    }
    Ok(())
}

