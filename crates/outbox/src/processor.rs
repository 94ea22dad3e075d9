//! Claims pending outbox rows and publishes them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::ShutdownSignal;
use futures_util::future::join_all;
use store::{OutboxMessage, OutboxStatus, OutboxStore};

use crate::bus::EventBus;
use crate::{BusError, OutboxError, Result};

/// Configuration for [`OutboxProcessor`].
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Identifies this processor instance in claims.
    pub worker_id: String,

    /// Maximum rows claimed per cycle.
    pub batch_size: usize,

    /// How long a claim is honoured before other workers may take the row.
    pub lease_timeout: Duration,

    /// Pause between cycles that found less than a full batch.
    pub poll_interval: Duration,

    /// Publish attempts before a row is parked as Failed.
    pub max_attempts: u32,

    /// Backoff after the first failed publish; doubles per further failure.
    pub retry_base_delay: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            worker_id: "outbox-worker".to_string(),
            batch_size: 50,
            lease_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            max_attempts: 5,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

impl OutboxConfig {
    /// Returns when a row that has now failed `attempts` times may be retried.
    pub fn next_attempt_at(&self, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let factor = 2u32.saturating_pow(attempts.saturating_sub(1));
        let delay = self.retry_base_delay.saturating_mul(factor);
        chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Outcome counts for one claim-and-publish cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub claimed: usize,

    /// Rows another worker claimed first.
    pub conflicts: usize,

    pub published: usize,
    pub retried: usize,
    pub failed: usize,

    /// Rows whose claim was taken over before this worker could settle them.
    pub lost_claims: usize,
}

impl BatchReport {
    fn merge(&mut self, other: BatchReport) {
        self.published += other.published;
        self.retried += other.retried;
        self.failed += other.failed;
        self.lost_claims += other.lost_claims;
    }
}

/// Delivers outbox rows to the bus with at-least-once semantics.
///
/// Rows are claimed one by one with a conditional update, so any number of
/// processors can share one outbox table; a row whose claim outlives the lease
/// becomes claimable again. Claimed rows are grouped by message type and the
/// groups are published concurrently, in creation order within a group.
pub struct OutboxProcessor<S: OutboxStore, B: EventBus> {
    store: S,
    bus: Arc<B>,
    config: OutboxConfig,
}

impl<S: OutboxStore, B: EventBus> OutboxProcessor<S, B> {
    pub fn new(store: S, bus: Arc<B>, config: OutboxConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(OutboxError::Config("batch_size must be at least 1".into()));
        }
        if config.max_attempts == 0 {
            return Err(OutboxError::Config("max_attempts must be at least 1".into()));
        }
        Ok(Self { store, bus, config })
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Polls the outbox until shutdown is signalled.
    ///
    /// A cycle that fails is logged and retried after the poll interval.
    #[tracing::instrument(skip_all, fields(worker_id = %self.config.worker_id))]
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        tracing::info!("Outbox processor started");

        while !shutdown.is_triggered() {
            let full_batch = match self.process_batch().await {
                Ok(report) => {
                    if report.claimed > 0 {
                        tracing::debug!(?report, "Outbox batch processed");
                    }
                    report.claimed + report.conflicts >= self.config.batch_size
                }
                Err(e) => {
                    tracing::error!(error = %e, "Outbox batch failed");
                    false
                }
            };

            if full_batch {
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.triggered() => break,
            }
        }

        tracing::info!("Outbox processor stopped");
    }

    /// Claims up to one batch of rows, publishes them and settles each claim.
    #[tracing::instrument(skip(self))]
    pub async fn process_batch(&self) -> Result<BatchReport> {
        let now = Utc::now();
        let lease_cutoff = chrono::Duration::from_std(self.config.lease_timeout)
            .ok()
            .and_then(|lease| now.checked_sub_signed(lease))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let candidates = self
            .store
            .claimable(self.config.batch_size, now, lease_cutoff)
            .await?;

        let mut report = BatchReport::default();
        let mut groups: BTreeMap<String, Vec<OutboxMessage>> = BTreeMap::new();
        for mut message in candidates {
            let worker = self.config.worker_id.as_str();
            if !self
                .store
                .try_claim(message.id, worker, now, lease_cutoff)
                .await?
            {
                report.conflicts += 1;
                metrics::counter!("outbox_claim_conflicts_total").increment(1);
                continue;
            }

            if message.status == OutboxStatus::Processing {
                tracing::warn!(
                    message_id = %message.id,
                    previous_owner = ?message.claimed_by,
                    "Reclaimed outbox row with expired lease"
                );
            }
            message.status = OutboxStatus::Processing;
            message.claimed_by = Some(worker.to_string());
            message.claimed_at = Some(now);

            report.claimed += 1;
            groups
                .entry(message.message_type.clone())
                .or_default()
                .push(message);
        }
        metrics::counter!("outbox_messages_claimed_total").increment(report.claimed as u64);

        let settled = join_all(
            groups
                .into_iter()
                .map(|(topic, messages)| self.publish_group(topic, messages)),
        )
        .await;

        for group in settled {
            report.merge(group?);
        }
        Ok(report)
    }

    async fn publish_group(&self, topic: String, messages: Vec<OutboxMessage>) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for message in messages {
            let outcome = self.bus.publish(&topic, &message).await;
            self.settle(&message, outcome, &mut report).await?;
        }
        Ok(report)
    }

    async fn settle(
        &self,
        message: &OutboxMessage,
        outcome: std::result::Result<(), BusError>,
        report: &mut BatchReport,
    ) -> Result<()> {
        let worker = self.config.worker_id.as_str();
        let now = Utc::now();

        let still_owned = match outcome {
            Ok(()) => {
                let owned = self.store.mark_processed(message.id, worker, now).await?;
                if owned {
                    report.published += 1;
                    metrics::counter!("outbox_messages_published_total").increment(1);
                }
                owned
            }
            Err(error) => {
                let attempts = message.attempts + 1;
                let reason = error.to_string();
                if attempts >= self.config.max_attempts {
                    let owned = self
                        .store
                        .mark_failed(message.id, worker, attempts, &reason)
                        .await?;
                    if owned {
                        report.failed += 1;
                        metrics::counter!("outbox_messages_failed_total").increment(1);
                        tracing::error!(
                            message_id = %message.id,
                            message_type = %message.message_type,
                            attempts,
                            error = %reason,
                            "Outbox message failed permanently"
                        );
                    }
                    owned
                } else {
                    let next_attempt_at = self.config.next_attempt_at(attempts, now);
                    let owned = self
                        .store
                        .mark_retry(message.id, worker, attempts, &reason, next_attempt_at)
                        .await?;
                    if owned {
                        report.retried += 1;
                        tracing::warn!(
                            message_id = %message.id,
                            attempts,
                            %next_attempt_at,
                            error = %reason,
                            "Outbox publish failed; will retry"
                        );
                    }
                    owned
                }
            }
        };

        if !still_owned {
            report.lost_claims += 1;
            tracing::warn!(
                message_id = %message.id,
                "Claim lost before settling; another worker owns the row"
            );
        }
        Ok(())
    }
}
