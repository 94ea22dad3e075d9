//! The enqueue/dequeue bridge between the dispatcher and background processing.

mod memory;
mod postgres;

pub use memory::InMemoryMessageQueue;
pub use postgres::PostgresMessageQueue;

use async_trait::async_trait;
use common::ShutdownSignal;

use crate::Result;
use crate::event::QueuedEvent;

/// A queue of events awaiting background handling.
///
/// Ordering is best-effort FIFO; consumers must not rely on it.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Adds an event to the queue.
    ///
    /// Fails with a transient error when the backend is unavailable.
    async fn enqueue(&self, event: &QueuedEvent) -> Result<()>;

    /// Waits for the next event.
    ///
    /// Returns `None` when the poll timeout elapses with nothing available or
    /// when shutdown is signalled, so the caller can re-check its own state.
    async fn dequeue(&self, shutdown: &mut ShutdownSignal) -> Result<Option<QueuedEvent>>;
}
