//! Domain event dispatch and background processing.
//!
//! This crate provides:
//! - [`EventDispatcher`], which drains entities after commit and routes each event
//! - [`MessageQueue`] with in-memory and PostgreSQL backends
//! - [`BackgroundEventProcessor`], the bounded-concurrency consumer with retry
//! - [`EventHandler`] and [`HandlerRegistry`] for pluggable per-type handlers

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod handler;
pub mod processor;
pub mod queue;
pub mod retry;

pub use dispatcher::{DispatchReport, EventDispatcher};
pub use error::{DispatchError, HandlerError, Result};
pub use event::QueuedEvent;
pub use handler::{EventHandler, HandlerRegistry};
pub use processor::{BackgroundEventProcessor, ProcessingOutcome, ProcessorConfig};
pub use queue::{InMemoryMessageQueue, MessageQueue, PostgresMessageQueue};
pub use retry::RetryPolicy;
