use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::shutdown_channel;
use outbox::{BusError, EventBus, InMemoryEventBus, OutboxConfig, OutboxProcessor};
use serde_json::json;
use store::{InMemoryStore, OutboxMessage, OutboxStatus, OutboxStore};
use tokio::sync::Notify;

fn config(worker_id: &str) -> OutboxConfig {
    OutboxConfig {
        worker_id: worker_id.to_string(),
        batch_size: 10,
        lease_timeout: Duration::from_secs(30),
        poll_interval: Duration::from_millis(10),
        max_attempts: 3,
        retry_base_delay: Duration::ZERO,
    }
}

async fn seed(store: &InMemoryStore, message_type: &str, count: usize) -> Vec<OutboxMessage> {
    let base = Utc::now() - chrono::Duration::minutes(1);
    let mut seeded = Vec::new();
    for i in 0..count {
        let created = base + chrono::Duration::milliseconds(i as i64);
        let message = OutboxMessage::pending(message_type, json!({ "seq": i }), created);
        store.push_outbox_message(message.clone()).await;
        seeded.push(message);
    }
    seeded
}

/// Bus that parks inside `publish` until released.
struct GatedBus {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl EventBus for GatedBus {
    async fn publish(&self, _topic: &str, _message: &OutboxMessage) -> Result<(), BusError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_published_rows_marked_processed() {
    let store = InMemoryStore::new();
    let seeded = seed(&store, "RegistrationConfirmed", 3).await;
    let bus = Arc::new(InMemoryEventBus::new());
    let processor = OutboxProcessor::new(store.clone(), bus.clone(), config("w1")).unwrap();

    let report = processor.process_batch().await.unwrap();
    assert_eq!(report.claimed, 3);
    assert_eq!(report.published, 3);

    for message in &seeded {
        let stored = store.get_message(message.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Processed);
        assert!(stored.processed_at.is_some());
    }
    assert_eq!(bus.published_count().await, 3);

    let again = processor.process_batch().await.unwrap();
    assert_eq!(again.claimed, 0);
    assert_eq!(bus.published_count().await, 3);
}

#[tokio::test]
async fn test_failed_publish_returns_row_to_pending_with_backoff() {
    let store = InMemoryStore::new();
    let seeded = seed(&store, "RegistrationCancelled", 1).await;
    let bus = Arc::new(InMemoryEventBus::new());
    bus.fail_next(1);

    let mut cfg = config("w1");
    cfg.retry_base_delay = Duration::from_secs(60);
    let processor = OutboxProcessor::new(store.clone(), bus.clone(), cfg).unwrap();

    let before = Utc::now();
    let report = processor.process_batch().await.unwrap();
    assert_eq!(report.retried, 1);

    let stored = store.get_message(seeded[0].id).await.unwrap().unwrap();
    assert_eq!(stored.status, OutboxStatus::Pending);
    assert_eq!(stored.attempts, 1);
    assert!(stored.last_error.is_some());
    assert!(stored.claimed_by.is_none());
    assert!(stored.next_attempt_at >= before + chrono::Duration::seconds(59));

    // Still backing off.
    let report = processor.process_batch().await.unwrap();
    assert_eq!(report.claimed, 0);
    assert_eq!(bus.published_count().await, 0);
}

#[tokio::test]
async fn test_row_fails_after_max_attempts() {
    let store = InMemoryStore::new();
    let seeded = seed(&store, "RegistrationPromoted", 1).await;
    let bus = Arc::new(InMemoryEventBus::new());
    bus.set_unavailable(true);

    let mut cfg = config("w1");
    cfg.max_attempts = 2;
    let processor = OutboxProcessor::new(store.clone(), bus.clone(), cfg).unwrap();

    assert_eq!(processor.process_batch().await.unwrap().retried, 1);
    assert_eq!(processor.process_batch().await.unwrap().failed, 1);

    let stored = store.get_message(seeded[0].id).await.unwrap().unwrap();
    assert_eq!(stored.status, OutboxStatus::Failed);
    assert_eq!(stored.attempts, 2);

    bus.set_unavailable(false);
    assert_eq!(processor.process_batch().await.unwrap().claimed, 0);
    assert_eq!(bus.published_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_competing_processors_never_double_claim() {
    let store = InMemoryStore::new();
    seed(&store, "RegistrationConfirmed", 40).await;
    let bus = Arc::new(InMemoryEventBus::new());

    let mut cfg_a = config("worker-a");
    cfg_a.batch_size = 40;
    let mut cfg_b = config("worker-b");
    cfg_b.batch_size = 40;
    let a = OutboxProcessor::new(store.clone(), bus.clone(), cfg_a).unwrap();
    let b = OutboxProcessor::new(store.clone(), bus.clone(), cfg_b).unwrap();

    let (ra, rb) = tokio::join!(a.process_batch(), b.process_batch());
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.claimed + rb.claimed, 40);
    assert_eq!(ra.published + rb.published, 40);

    let published = bus.published().await;
    let ids: HashSet<_> = published.iter().map(|(_, m)| m.id).collect();
    assert_eq!(published.len(), 40);
    assert_eq!(ids.len(), 40);

    let counts = store.count_by_status().await.unwrap();
    assert_eq!(counts.processed, 40);
    assert_eq!(counts.pending + counts.processing, 0);
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed() {
    let store = InMemoryStore::new();
    let mut orphan = OutboxMessage::pending(
        "RegistrationConfirmed",
        json!({}),
        Utc::now() - chrono::Duration::minutes(5),
    );
    orphan.status = OutboxStatus::Processing;
    orphan.claimed_by = Some("crashed-worker".into());
    orphan.claimed_at = Some(Utc::now() - chrono::Duration::minutes(2));
    store.push_outbox_message(orphan.clone()).await;

    let mut fresh = orphan.clone();
    fresh.id = common::MessageId::new();
    fresh.claimed_by = Some("live-worker".into());
    fresh.claimed_at = Some(Utc::now());
    store.push_outbox_message(fresh.clone()).await;

    let bus = Arc::new(InMemoryEventBus::new());
    let processor = OutboxProcessor::new(store.clone(), bus.clone(), config("w1")).unwrap();

    let report = processor.process_batch().await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.published, 1);

    let reclaimed = store.get_message(orphan.id).await.unwrap().unwrap();
    assert_eq!(reclaimed.status, OutboxStatus::Processed);
    let untouched = store.get_message(fresh.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, OutboxStatus::Processing);
    assert_eq!(untouched.claimed_by.as_deref(), Some("live-worker"));
}

#[tokio::test]
async fn test_stale_worker_cannot_settle_reclaimed_row() {
    let store = InMemoryStore::new();
    let seeded = seed(&store, "RegistrationConfirmed", 1).await;

    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let gated = Arc::new(GatedBus {
        entered: entered.clone(),
        release: release.clone(),
    });

    let mut slow_cfg = config("slow");
    slow_cfg.lease_timeout = Duration::ZERO;
    let slow = OutboxProcessor::new(store.clone(), gated, slow_cfg).unwrap();
    let slow_task = tokio::spawn(async move { slow.process_batch().await });

    entered.notified().await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let bus = Arc::new(InMemoryEventBus::new());
    let mut fast_cfg = config("fast");
    fast_cfg.lease_timeout = Duration::ZERO;
    let fast = OutboxProcessor::new(store.clone(), bus.clone(), fast_cfg).unwrap();
    let report = fast.process_batch().await.unwrap();
    assert_eq!(report.published, 1);

    release.notify_one();
    let slow_report = slow_task.await.unwrap().unwrap();
    assert_eq!(slow_report.claimed, 1);
    assert_eq!(slow_report.published, 0);
    assert_eq!(slow_report.lost_claims, 1);

    let stored = store.get_message(seeded[0].id).await.unwrap().unwrap();
    assert_eq!(stored.status, OutboxStatus::Processed);
    assert_eq!(stored.claimed_by.as_deref(), Some("fast"));
}

#[tokio::test]
async fn test_groups_publish_in_creation_order_per_topic() {
    let store = InMemoryStore::new();
    seed(&store, "RegistrationConfirmed", 3).await;
    seed(&store, "RegistrationCancelled", 2).await;
    let bus = Arc::new(InMemoryEventBus::new());
    let processor = OutboxProcessor::new(store.clone(), bus.clone(), config("w1")).unwrap();

    processor.process_batch().await.unwrap();

    let published = bus.published().await;
    for topic in ["RegistrationConfirmed", "RegistrationCancelled"] {
        let seqs: Vec<_> = published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, m)| m.payload["seq"].as_u64().unwrap())
            .collect();
        let mut sorted = seqs.clone();
        sorted.sort();
        assert_eq!(seqs, sorted);
        assert!(published.iter().filter(|(t, _)| t == topic).all(|(_, m)| m.message_type == topic));
    }
    assert_eq!(published.len(), 5);
}

#[tokio::test]
async fn test_run_drains_outbox_until_shutdown() {
    let store = InMemoryStore::new();
    seed(&store, "RegistrationConfirmed", 25).await;
    let bus = Arc::new(InMemoryEventBus::new());
    let processor = OutboxProcessor::new(store.clone(), bus.clone(), config("w1")).unwrap();

    let (trigger, signal) = shutdown_channel();
    let handle = tokio::spawn(async move { processor.run(signal).await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while bus.published_count().await < 25 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("outbox should drain");

    trigger.trigger();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("processor should stop")
        .unwrap();
}

#[test]
fn test_zero_batch_size_rejected() {
    let mut cfg = config("w1");
    cfg.batch_size = 0;
    let result = OutboxProcessor::new(InMemoryStore::new(), Arc::new(InMemoryEventBus::new()), cfg);
    assert!(result.is_err());
}

#[test]
fn test_backoff_doubles_per_attempt() {
    let mut cfg = config("w1");
    cfg.retry_base_delay = Duration::from_millis(100);
    let now = Utc::now();
    assert_eq!(cfg.next_attempt_at(1, now), now + chrono::Duration::milliseconds(100));
    assert_eq!(cfg.next_attempt_at(2, now), now + chrono::Duration::milliseconds(200));
    assert_eq!(cfg.next_attempt_at(4, now), now + chrono::Duration::milliseconds(800));
}
