use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, MessageId, RegistrantId, RegistrationId};
use domain::{Registrant, Registration, ScheduledEvent};

use crate::{OutboxCounts, OutboxMessage, Result};

/// Entry point for registration persistence.
///
/// Registration rows are only ever written through a [`RegistrationTx`], whose
/// per-event critical section spans the whole read-modify-write sequence.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Transaction type handed out by [`begin`](Self::begin).
    type Tx: RegistrationTx;

    /// Starts a transaction.
    async fn begin(&self) -> Result<Self::Tx>;

    /// Inserts a scheduled event.
    async fn insert_event(&self, event: &ScheduledEvent) -> Result<()>;

    /// Inserts a registrant.
    async fn insert_registrant(&self, registrant: &Registrant) -> Result<()>;

    /// Loads a scheduled event outside any critical section.
    async fn get_event(&self, event_id: EventId) -> Result<Option<ScheduledEvent>>;

    /// Loads a registration outside any critical section.
    async fn get_registration(&self, id: RegistrationId) -> Result<Option<Registration>>;

    /// Lists every registration of an event, oldest first.
    async fn list_registrations(&self, event_id: EventId) -> Result<Vec<Registration>>;
}

/// A unit of work over registration state.
///
/// Dropping a transaction without committing discards every staged write and
/// releases the critical sections it holds.
#[async_trait]
pub trait RegistrationTx: Send {
    /// Enters the critical section for `event_id` and loads the event.
    ///
    /// Blocks until no other transaction holds the section. The section is
    /// released on commit or rollback. Returns `None` for an unknown event.
    async fn lock_event(&mut self, event_id: EventId) -> Result<Option<ScheduledEvent>>;

    async fn registrant_exists(&mut self, registrant_id: RegistrantId) -> Result<bool>;

    /// Finds the non-cancelled registration of a registrant for an event.
    async fn find_active_registration(
        &mut self,
        event_id: EventId,
        registrant_id: RegistrantId,
    ) -> Result<Option<Registration>>;

    async fn get_registration(&mut self, id: RegistrationId) -> Result<Option<Registration>>;

    async fn count_confirmed(&mut self, event_id: EventId) -> Result<u32>;

    /// Returns the waitlisted registrations of an event, lowest position first.
    async fn waitlist(&mut self, event_id: EventId) -> Result<Vec<Registration>>;

    async fn insert_registration(&mut self, registration: &Registration) -> Result<()>;

    async fn update_registration(&mut self, registration: &Registration) -> Result<()>;

    async fn update_capacity(&mut self, event_id: EventId, capacity: u32) -> Result<()>;

    /// Stages an outbox row that becomes visible only if the transaction commits.
    async fn insert_outbox_message(&mut self, message: &OutboxMessage) -> Result<()>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// Claim-based access to the outbox table.
///
/// Every state change after the claim is conditional on the caller still
/// holding the claim; a `false` return means another worker took over.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Lists rows a worker may try to claim, oldest first.
    ///
    /// Includes Pending rows due at `now` and Processing rows claimed before
    /// `lease_cutoff`.
    async fn claimable(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease_cutoff: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>>;

    /// Claims a row for `worker` if it is still claimable.
    ///
    /// Returns true when this call won the claim.
    async fn try_claim(
        &self,
        id: MessageId,
        worker: &str,
        now: DateTime<Utc>,
        lease_cutoff: DateTime<Utc>,
    ) -> Result<bool>;

    /// Marks a claimed row as published.
    async fn mark_processed(&self, id: MessageId, worker: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Returns a claimed row to Pending after a failed publish.
    async fn mark_retry(
        &self,
        id: MessageId,
        worker: &str,
        attempts: u32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Parks a claimed row as Failed after its final attempt.
    async fn mark_failed(
        &self,
        id: MessageId,
        worker: &str,
        attempts: u32,
        error: &str,
    ) -> Result<bool>;

    async fn get_message(&self, id: MessageId) -> Result<Option<OutboxMessage>>;

    /// Counts rows per status, for operators.
    async fn count_by_status(&self) -> Result<OutboxCounts>;
}
