//! The external pub/sub bus the outbox publishes to.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use store::OutboxMessage;
use tokio::sync::Mutex;

use crate::BusError;

/// Topic-routed publisher.
///
/// Delivery is at-least-once: a message may be published again after a
/// crash or a lost claim, so subscribers must deduplicate on the message id.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, message: &OutboxMessage) -> Result<(), BusError>;
}

/// Bus that records published messages, for tests and local runs.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    published: Arc<Mutex<Vec<(String, OutboxMessage)>>>,
    unavailable: Arc<AtomicBool>,
    failures_remaining: Arc<AtomicU32>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publish fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `count` publishes fail.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Returns every (topic, message) pair published so far.
    pub async fn published(&self) -> Vec<(String, OutboxMessage)> {
        self.published.lock().await.clone()
    }

    pub async fn published_count(&self) -> usize {
        self.published.lock().await.len()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, message: &OutboxMessage) -> Result<(), BusError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("in-memory bus disabled".into()));
        }
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BusError::Publish {
                topic: topic.to_string(),
                reason: "injected failure".into(),
            });
        }

        self.published
            .lock()
            .await
            .push((topic.to_string(), message.clone()));
        Ok(())
    }
}

/// Bus that only logs, for deployments without a broker.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventBus;

#[async_trait]
impl EventBus for LoggingEventBus {
    async fn publish(&self, topic: &str, message: &OutboxMessage) -> Result<(), BusError> {
        tracing::info!(
            topic,
            message_id = %message.id,
            payload = %message.payload,
            "Published outbox message"
        );
        Ok(())
    }
}
