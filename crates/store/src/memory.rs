use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, MessageId, RegistrantId, RegistrationId};
use domain::{Registrant, Registration, RegistrationStatus, ScheduledEvent};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    OutboxCounts, OutboxMessage, OutboxStatus, Result, StoreError,
    store::{OutboxStore, RegistrationStore, RegistrationTx},
};

#[derive(Default)]
struct MemoryState {
    events: HashMap<EventId, ScheduledEvent>,
    registrants: HashMap<RegistrantId, Registrant>,
    registrations: HashMap<RegistrationId, Registration>,
    outbox: Vec<OutboxMessage>,
}

/// In-memory store implementation for testing.
///
/// Provides the same transactional semantics as the PostgreSQL store: writes
/// are staged on the transaction and applied atomically on commit, and each
/// event's critical section is a mutex held by the transaction until it ends.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
    event_locks: Arc<Mutex<HashMap<EventId, Arc<Mutex<()>>>>>,
    fail_on_commit: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent commit fail, discarding the staged writes.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.fail_on_commit.store(fail, Ordering::SeqCst);
    }

    /// Returns the total number of registrations stored.
    pub async fn registration_count(&self) -> usize {
        self.state.read().await.registrations.len()
    }

    /// Returns every outbox row, oldest first.
    pub async fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.state.read().await.outbox.clone()
    }

    /// Appends an outbox row outside any transaction.
    pub async fn push_outbox_message(&self, message: OutboxMessage) {
        self.state.write().await.outbox.push(message);
    }

    async fn with_message<F>(&self, id: MessageId, update: F) -> bool
    where
        F: FnOnce(&mut OutboxMessage) -> bool + Send,
    {
        let mut state = self.state.write().await;
        state
            .outbox
            .iter_mut()
            .find(|m| m.id == id)
            .is_some_and(update)
    }
}

#[async_trait]
impl RegistrationStore for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx> {
        Ok(InMemoryTx {
            store: self.clone(),
            held: HashMap::new(),
            registrations: HashMap::new(),
            capacities: HashMap::new(),
            outbox: Vec::new(),
        })
    }

    async fn insert_event(&self, event: &ScheduledEvent) -> Result<()> {
        self.state
            .write()
            .await
            .events
            .insert(event.id, event.clone());
        Ok(())
    }

    async fn insert_registrant(&self, registrant: &Registrant) -> Result<()> {
        self.state
            .write()
            .await
            .registrants
            .insert(registrant.id, registrant.clone());
        Ok(())
    }

    async fn get_event(&self, event_id: EventId) -> Result<Option<ScheduledEvent>> {
        Ok(self.state.read().await.events.get(&event_id).cloned())
    }

    async fn get_registration(&self, id: RegistrationId) -> Result<Option<Registration>> {
        Ok(self.state.read().await.registrations.get(&id).cloned())
    }

    async fn list_registrations(&self, event_id: EventId) -> Result<Vec<Registration>> {
        let state = self.state.read().await;
        let mut registrations: Vec<_> = state
            .registrations
            .values()
            .filter(|r| r.event_id() == event_id)
            .cloned()
            .collect();
        registrations.sort_by_key(|r| (r.created_at(), r.id()));
        Ok(registrations)
    }
}

/// Transaction over an [`InMemoryStore`].
pub struct InMemoryTx {
    store: InMemoryStore,
    held: HashMap<EventId, OwnedMutexGuard<()>>,
    registrations: HashMap<RegistrationId, Registration>,
    capacities: HashMap<EventId, u32>,
    outbox: Vec<OutboxMessage>,
}

impl InMemoryTx {
    /// Committed registrations of the event overlaid with this transaction's writes.
    async fn event_registrations(&self, event_id: EventId) -> Vec<Registration> {
        let state = self.store.state.read().await;
        let mut merged: HashMap<RegistrationId, Registration> = state
            .registrations
            .values()
            .filter(|r| r.event_id() == event_id)
            .map(|r| (r.id(), r.clone()))
            .collect();

        for staged in self.registrations.values() {
            if staged.event_id() == event_id {
                merged.insert(staged.id(), staged.clone());
            }
        }

        merged.into_values().collect()
    }
}

#[async_trait]
impl RegistrationTx for InMemoryTx {
    async fn lock_event(&mut self, event_id: EventId) -> Result<Option<ScheduledEvent>> {
        if !self.held.contains_key(&event_id) {
            let lock = {
                let mut locks = self.store.event_locks.lock().await;
                locks.entry(event_id).or_default().clone()
            };
            let guard = lock.lock_owned().await;
            self.held.insert(event_id, guard);
        }

        let state = self.store.state.read().await;
        let event = state.events.get(&event_id).cloned().map(|mut event| {
            if let Some(capacity) = self.capacities.get(&event_id) {
                event.capacity = *capacity;
            }
            event
        });
        Ok(event)
    }

    async fn registrant_exists(&mut self, registrant_id: RegistrantId) -> Result<bool> {
        Ok(self
            .store
            .state
            .read()
            .await
            .registrants
            .contains_key(&registrant_id))
    }

    async fn find_active_registration(
        &mut self,
        event_id: EventId,
        registrant_id: RegistrantId,
    ) -> Result<Option<Registration>> {
        Ok(self
            .event_registrations(event_id)
            .await
            .into_iter()
            .find(|r| r.registrant_id() == registrant_id && r.is_active()))
    }

    async fn get_registration(&mut self, id: RegistrationId) -> Result<Option<Registration>> {
        if let Some(staged) = self.registrations.get(&id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.store.state.read().await.registrations.get(&id).cloned())
    }

    async fn count_confirmed(&mut self, event_id: EventId) -> Result<u32> {
        let confirmed = self
            .event_registrations(event_id)
            .await
            .iter()
            .filter(|r| r.status() == RegistrationStatus::Confirmed)
            .count();
        u32::try_from(confirmed).map_err(|_| StoreError::Corrupt("confirmed count overflow".into()))
    }

    async fn waitlist(&mut self, event_id: EventId) -> Result<Vec<Registration>> {
        let mut waitlist: Vec<_> = self
            .event_registrations(event_id)
            .await
            .into_iter()
            .filter(|r| r.is_waitlisted())
            .collect();
        waitlist.sort_by_key(|r| r.position_in_queue());
        Ok(waitlist)
    }

    async fn insert_registration(&mut self, registration: &Registration) -> Result<()> {
        if registration.is_active() {
            let existing = self
                .find_active_registration(registration.event_id(), registration.registrant_id())
                .await?;
            if existing.is_some_and(|r| r.id() != registration.id()) {
                return Err(StoreError::DuplicateActiveRegistration {
                    event_id: registration.event_id(),
                    registrant_id: registration.registrant_id(),
                });
            }
        }

        self.registrations
            .insert(registration.id(), registration.detached());
        Ok(())
    }

    async fn update_registration(&mut self, registration: &Registration) -> Result<()> {
        let id = registration.id();
        let exists = self.registrations.contains_key(&id)
            || self.store.state.read().await.registrations.contains_key(&id);
        if !exists {
            return Err(StoreError::Corrupt(format!(
                "registration {id} missing on update"
            )));
        }

        self.registrations.insert(id, registration.detached());
        Ok(())
    }

    async fn update_capacity(&mut self, event_id: EventId, capacity: u32) -> Result<()> {
        self.capacities.insert(event_id, capacity);
        Ok(())
    }

    async fn insert_outbox_message(&mut self, message: &OutboxMessage) -> Result<()> {
        self.outbox.push(message.clone());
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let InMemoryTx {
            store,
            held,
            registrations,
            capacities,
            outbox,
        } = self;

        if store.fail_on_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected commit failure".into()));
        }

        let mut state = store.state.write().await;
        let written = registrations.len();
        state.registrations.extend(registrations);
        for (event_id, capacity) in capacities {
            if let Some(event) = state.events.get_mut(&event_id) {
                event.capacity = capacity;
            }
        }
        let staged_messages = outbox.len();
        state.outbox.extend(outbox);
        drop(state);

        tracing::debug!(
            registrations = written,
            outbox_messages = staged_messages,
            "In-memory transaction committed"
        );

        // Critical sections end only after the writes are visible
        drop(held);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn claimable(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease_cutoff: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>> {
        let state = self.state.read().await;
        let mut messages: Vec<_> = state
            .outbox
            .iter()
            .filter(|m| m.is_claimable(now, lease_cutoff))
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        messages.truncate(limit);
        Ok(messages)
    }

    async fn try_claim(
        &self,
        id: MessageId,
        worker: &str,
        now: DateTime<Utc>,
        lease_cutoff: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .with_message(id, |message| {
                if !message.is_claimable(now, lease_cutoff) {
                    return false;
                }
                message.status = OutboxStatus::Processing;
                message.claimed_by = Some(worker.to_string());
                message.claimed_at = Some(now);
                true
            })
            .await)
    }

    async fn mark_processed(&self, id: MessageId, worker: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .with_message(id, |message| {
                if !message.is_claimed_by(worker) {
                    return false;
                }
                message.status = OutboxStatus::Processed;
                message.processed_at = Some(now);
                true
            })
            .await)
    }

    async fn mark_retry(
        &self,
        id: MessageId,
        worker: &str,
        attempts: u32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .with_message(id, |message| {
                if !message.is_claimed_by(worker) {
                    return false;
                }
                message.status = OutboxStatus::Pending;
                message.attempts = attempts;
                message.last_error = Some(error.to_string());
                message.next_attempt_at = next_attempt_at;
                message.claimed_by = None;
                message.claimed_at = None;
                true
            })
            .await)
    }

    async fn mark_failed(
        &self,
        id: MessageId,
        worker: &str,
        attempts: u32,
        error: &str,
    ) -> Result<bool> {
        Ok(self
            .with_message(id, |message| {
                if !message.is_claimed_by(worker) {
                    return false;
                }
                message.status = OutboxStatus::Failed;
                message.attempts = attempts;
                message.last_error = Some(error.to_string());
                message.claimed_by = None;
                message.claimed_at = None;
                true
            })
            .await)
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<OutboxMessage>> {
        let state = self.state.read().await;
        Ok(state.outbox.iter().find(|m| m.id == id).cloned())
    }

    async fn count_by_status(&self) -> Result<OutboxCounts> {
        let state = self.state.read().await;
        let mut counts = OutboxCounts::default();
        for message in &state.outbox {
            counts.add(message.status, 1);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use super::*;
    use chrono::Duration;

    async fn seeded_store(capacity: u32) -> (InMemoryStore, ScheduledEvent, Registrant) {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let event = ScheduledEvent::new("Workshop", capacity, now, now + Duration::hours(2)).published();
        let registrant = Registrant::new("ada@example.com");
        store.insert_event(&event).await.unwrap();
        store.insert_registrant(&registrant).await.unwrap();
        (store, event, registrant)
    }

    #[tokio::test]
    async fn commit_applies_staged_writes() {
        let (store, event, registrant) = seeded_store(1).await;
        let registration = Registration::confirmed(event.id, registrant.id, Utc::now());
        let message = OutboxMessage::pending("RegistrationConfirmed", serde_json::json!({}), Utc::now());

        let mut tx = store.begin().await.unwrap();
        tx.lock_event(event.id).await.unwrap();
        tx.insert_registration(&registration).await.unwrap();
        tx.insert_outbox_message(&message).await.unwrap();

        // Not visible before commit
        assert_eq!(store.registration_count().await, 0);
        assert!(store.outbox_messages().await.is_empty());

        tx.commit().await.unwrap();

        assert_eq!(store.registration_count().await, 1);
        assert_eq!(store.outbox_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn rollback_discards_registration_and_outbox_row() {
        let (store, event, registrant) = seeded_store(1).await;
        let registration = Registration::confirmed(event.id, registrant.id, Utc::now());
        let message = OutboxMessage::pending("RegistrationConfirmed", serde_json::json!({}), Utc::now());

        let mut tx = store.begin().await.unwrap();
        tx.lock_event(event.id).await.unwrap();
        tx.insert_registration(&registration).await.unwrap();
        tx.insert_outbox_message(&message).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.registration_count().await, 0);
        assert!(store.outbox_messages().await.is_empty());
    }

    #[tokio::test]
    async fn failed_commit_discards_everything() {
        let (store, event, registrant) = seeded_store(1).await;
        store.set_fail_on_commit(true);

        let mut tx = store.begin().await.unwrap();
        tx.lock_event(event.id).await.unwrap();
        tx.insert_registration(&Registration::confirmed(event.id, registrant.id, Utc::now()))
            .await
            .unwrap();
        tx.insert_outbox_message(&OutboxMessage::pending("X", serde_json::json!({}), Utc::now()))
            .await
            .unwrap();

        assert!(matches!(
            tx.commit().await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.registration_count().await, 0);
        assert!(store.outbox_messages().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_active_registration_rejected() {
        let (store, event, registrant) = seeded_store(5).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_registration(&Registration::confirmed(event.id, registrant.id, Utc::now()))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let result = tx
            .insert_registration(&Registration::confirmed(event.id, registrant.id, Utc::now()))
            .await;
        assert!(matches!(
            result,
            Err(StoreError::DuplicateActiveRegistration { .. })
        ));
    }

    #[tokio::test]
    async fn reads_see_own_staged_writes() {
        let (store, event, registrant) = seeded_store(5).await;
        let other = Registrant::new("grace@example.com");
        store.insert_registrant(&other).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_registration(&Registration::confirmed(event.id, registrant.id, Utc::now()))
            .await
            .unwrap();
        tx.insert_registration(&Registration::waitlisted(event.id, other.id, 1, Utc::now()).unwrap())
            .await
            .unwrap();
        tx.update_capacity(event.id, 9).await.unwrap();

        assert_eq!(tx.count_confirmed(event.id).await.unwrap(), 1);
        assert_eq!(tx.waitlist(event.id).await.unwrap().len(), 1);
        assert_eq!(tx.lock_event(event.id).await.unwrap().unwrap().capacity, 9);
        assert_eq!(store.get_event(event.id).await.unwrap().unwrap().capacity, 5);
    }

    #[tokio::test]
    async fn lock_event_excludes_other_transactions_until_commit() {
        let (store, event, _) = seeded_store(1).await;

        let mut first = store.begin().await.unwrap();
        first.lock_event(event.id).await.unwrap();

        let contender = store.clone();
        let event_id = event.id;
        let handle = tokio::spawn(async move {
            let mut second = contender.begin().await.unwrap();
            second.lock_event(event_id).await.unwrap();
            second.commit().await.unwrap();
        });

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(!handle.is_finished());

        first.commit().await.unwrap();
        tokio::time::timeout(StdDuration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn lock_event_is_reentrant_within_transaction() {
        let (store, event, _) = seeded_store(1).await;
        let mut tx = store.begin().await.unwrap();
        tx.lock_event(event.id).await.unwrap();
        let again = tokio::time::timeout(StdDuration::from_millis(200), tx.lock_event(event.id))
            .await
            .unwrap()
            .unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn only_one_worker_claims_a_row() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let message = OutboxMessage::pending("RegistrationConfirmed", serde_json::json!({}), now);
        store.push_outbox_message(message.clone()).await;

        let cutoff = now - Duration::seconds(30);
        let (a, b) = tokio::join!(
            store.try_claim(message.id, "worker-a", now, cutoff),
            store.try_claim(message.id, "worker-b", now, cutoff),
        );
        assert!(a.unwrap() ^ b.unwrap());
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimable() {
        let store = InMemoryStore::new();
        let claimed_at = Utc::now() - Duration::seconds(60);
        let message = OutboxMessage::pending("RegistrationConfirmed", serde_json::json!({}), claimed_at);
        store.push_outbox_message(message.clone()).await;

        assert!(store
            .try_claim(message.id, "crashed", claimed_at, claimed_at - Duration::seconds(30))
            .await
            .unwrap());

        let now = Utc::now();
        let cutoff = now - Duration::seconds(30);
        assert_eq!(store.claimable(10, now, cutoff).await.unwrap().len(), 1);
        assert!(store.try_claim(message.id, "rescuer", now, cutoff).await.unwrap());

        // The original owner can no longer complete the row
        assert!(!store.mark_processed(message.id, "crashed", now).await.unwrap());
        assert!(store.mark_processed(message.id, "rescuer", now).await.unwrap());

        let stored = store.get_message(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Processed);
        assert_eq!(stored.claimed_by.as_deref(), Some("rescuer"));
    }

    #[tokio::test]
    async fn retry_returns_row_to_pending_with_backoff() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let message = OutboxMessage::pending("RegistrationConfirmed", serde_json::json!({}), now);
        store.push_outbox_message(message.clone()).await;

        let cutoff = now - Duration::seconds(30);
        store.try_claim(message.id, "w", now, cutoff).await.unwrap();
        let next = now + Duration::seconds(1);
        assert!(store.mark_retry(message.id, "w", 1, "bus down", next).await.unwrap());

        assert!(store.claimable(10, now, cutoff).await.unwrap().is_empty());
        assert_eq!(store.claimable(10, next, cutoff).await.unwrap().len(), 1);

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.processing, 0);
    }
}
