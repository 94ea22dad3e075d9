//! Transactional outbox delivery.
//!
//! Rows are written by the allocator in the same transaction as the
//! registration change they describe. [`OutboxProcessor`] claims them with a
//! lease, publishes them through an [`EventBus`] and records the result.

pub mod bus;
pub mod error;
pub mod processor;

pub use bus::{EventBus, InMemoryEventBus, LoggingEventBus};
pub use error::{BusError, OutboxError, Result};
pub use processor::{BatchReport, OutboxConfig, OutboxProcessor};
