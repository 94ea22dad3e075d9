//! Outbox rows and their lifecycle states.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::MessageId;
use domain::DomainEvent;
use serde::{Deserialize, Serialize};

use crate::{Result, StoreError};

/// Delivery state of an outbox row.
///
/// Transitions only move forward: Pending to Processing, then Processed,
/// back to Pending for a retry, or Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutboxStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "Pending",
            OutboxStatus::Processing => "Processing",
            OutboxStatus::Processed => "Processed",
            OutboxStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Pending" => Ok(OutboxStatus::Pending),
            "Processing" => Ok(OutboxStatus::Processing),
            "Processed" => Ok(OutboxStatus::Processed),
            "Failed" => Ok(OutboxStatus::Failed),
            other => Err(StoreError::Corrupt(format!("unknown outbox status {other}"))),
        }
    }
}

/// A message waiting to be published to the external bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: MessageId,

    /// Event type name; also the bus topic.
    pub message_type: String,

    pub payload: serde_json::Value,
    pub status: OutboxStatus,

    /// Worker holding the current claim.
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,

    /// Failed publish attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,

    /// Earliest time a Pending row may be claimed.
    pub next_attempt_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    /// Creates a Pending row that is claimable immediately.
    pub fn pending(
        message_type: impl Into<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            message_type: message_type.into(),
            payload,
            status: OutboxStatus::Pending,
            claimed_by: None,
            claimed_at: None,
            attempts: 0,
            last_error: None,
            next_attempt_at: now,
            created_at: now,
            processed_at: None,
        }
    }

    /// Serializes a domain event into a Pending row.
    pub fn from_event<E: DomainEvent>(event: &E) -> Result<Self> {
        let payload = serde_json::to_value(event)?;
        Ok(Self::pending(event.event_type(), payload, event.occurred_at()))
    }

    /// Returns true if a worker may claim the row at `now`.
    ///
    /// A Processing row is claimable once its claim is older than `lease_cutoff`.
    pub fn is_claimable(&self, now: DateTime<Utc>, lease_cutoff: DateTime<Utc>) -> bool {
        match self.status {
            OutboxStatus::Pending => self.next_attempt_at <= now,
            OutboxStatus::Processing => self.claimed_at.is_some_and(|at| at < lease_cutoff),
            OutboxStatus::Processed | OutboxStatus::Failed => false,
        }
    }

    /// Returns true if `worker` currently holds the claim.
    pub fn is_claimed_by(&self, worker: &str) -> bool {
        self.status == OutboxStatus::Processing && self.claimed_by.as_deref() == Some(worker)
    }
}

/// Row counts per outbox status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxCounts {
    pub pending: u64,
    pub processing: u64,
    pub processed: u64,
    pub failed: u64,
}

impl OutboxCounts {
    pub(crate) fn add(&mut self, status: OutboxStatus, count: u64) {
        match status {
            OutboxStatus::Pending => self.pending += count,
            OutboxStatus::Processing => self.processing += count,
            OutboxStatus::Processed => self.processed += count,
            OutboxStatus::Failed => self.failed += count,
        }
    }
}
