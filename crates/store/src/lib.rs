//! Persistence for registrations and the transactional outbox.
//!
//! [`RegistrationStore`] hands out [`RegistrationTx`] units of work whose
//! per-event critical section lives as long as the transaction.
//! [`OutboxStore`] exposes the claim/lease protocol used by outbox processors.
//! Both are implemented in memory and on PostgreSQL.

pub mod error;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, InMemoryTx};
pub use outbox::{OutboxCounts, OutboxMessage, OutboxStatus};
pub use postgres::{PostgresStore, PostgresTx};
pub use store::{OutboxStore, RegistrationStore, RegistrationTx};
