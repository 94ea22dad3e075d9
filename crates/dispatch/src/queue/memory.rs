use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::ShutdownSignal;
use tokio::sync::{Mutex, Notify};

use crate::event::QueuedEvent;
use crate::queue::MessageQueue;
use crate::{DispatchError, Result};

/// In-process FIFO queue for development and tests.
///
/// Waiting consumers are woken by enqueue; there is no background timer, so
/// an event is delivered as soon as one consumer is waiting.
#[derive(Clone)]
pub struct InMemoryMessageQueue {
    inner: Arc<Inner>,
}

struct Inner {
    events: Mutex<VecDeque<QueuedEvent>>,
    notify: Notify,
    poll_timeout: Duration,
    unavailable: AtomicBool,
}

impl InMemoryMessageQueue {
    /// Creates an empty queue whose dequeue gives up after `poll_timeout`.
    pub fn new(poll_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                events: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                poll_timeout,
                unavailable: AtomicBool::new(false),
            }),
        }
    }

    /// Makes enqueue fail with a transient error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of queued events.
    pub async fn len(&self) -> usize {
        self.inner.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn enqueue(&self, event: &QueuedEvent) -> Result<()> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(DispatchError::Transient("in-memory queue unavailable".into()));
        }

        self.inner.events.lock().await.push_back(event.clone());
        self.inner.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, shutdown: &mut ShutdownSignal) -> Result<Option<QueuedEvent>> {
        let deadline = tokio::time::sleep(self.inner.poll_timeout);
        tokio::pin!(deadline);

        loop {
            if shutdown.is_triggered() {
                return Ok(None);
            }

            // Register interest before checking so an enqueue in between is not missed
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(event) = self.inner.events.lock().await.pop_front() {
                return Ok(Some(event));
            }

            tokio::select! {
                _ = &mut notified => continue,
                _ = shutdown.triggered() => return Ok(None),
                _ = &mut deadline => return Ok(None),
            }
        }
    }
}
