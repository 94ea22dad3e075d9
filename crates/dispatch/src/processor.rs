//! Background processor draining the message queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::ShutdownSignal;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::event::QueuedEvent;
use crate::handler::HandlerRegistry;
use crate::queue::MessageQueue;
use crate::retry::RetryPolicy;
use crate::{HandlerError, Result};

/// Configuration for [`BackgroundEventProcessor`].
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Maximum number of events handled at the same time.
    pub max_concurrency: usize,

    pub retry: RetryPolicy,

    /// Time given to in-flight handlers after shutdown before they are aborted.
    pub shutdown_grace: Duration,

    /// Pause after a failed dequeue.
    pub error_backoff: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            retry: RetryPolicy::default(),
            shutdown_grace: Duration::from_secs(10),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// What happened to one dequeued event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// The handler succeeded.
    Handled { attempts: u32 },

    /// No handler is registered for the event type.
    Dropped,

    /// The handler failed permanently or ran out of attempts.
    Failed { attempts: u32, error: HandlerError },
}

impl ProcessingOutcome {
    fn label(&self) -> &'static str {
        match self {
            ProcessingOutcome::Handled { .. } => "handled",
            ProcessingOutcome::Dropped => "dropped",
            ProcessingOutcome::Failed { .. } => "failed",
        }
    }
}

/// Dequeues events and runs their handlers with bounded concurrency.
///
/// A slot is acquired before each dequeue and released when the handler
/// finishes, so at most `max_concurrency` events are in flight. Handler
/// failures never stop the loop.
pub struct BackgroundEventProcessor {
    queue: Arc<dyn MessageQueue>,
    handlers: Arc<HandlerRegistry>,
    config: ProcessorConfig,
    slots: Arc<Semaphore>,
}

impl BackgroundEventProcessor {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        handlers: Arc<HandlerRegistry>,
        config: ProcessorConfig,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            queue,
            handlers,
            config,
            slots,
        }
    }

    /// Returns the number of free concurrency slots.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Runs until shutdown is signalled, then waits up to the grace period
    /// for in-flight handlers.
    #[tracing::instrument(skip_all, fields(max_concurrency = self.config.max_concurrency))]
    pub async fn run(&self, mut shutdown: ShutdownSignal) -> Result<()> {
        let mut in_flight = JoinSet::new();
        tracing::info!("Background event processor started");

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                log_join_result(joined);
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let event = match self.queue.dequeue(&mut shutdown).await {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "Dequeue failed");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                        _ = shutdown.triggered() => {}
                    }
                    continue;
                }
            };

            let handlers = self.handlers.clone();
            let retry = self.config.retry.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                handle_with_retry(&handlers, &retry, event).await
            });
        }

        tracing::info!(in_flight = in_flight.len(), "Draining in-flight events");
        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(joined) = in_flight.join_next().await {
                log_join_result(joined);
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                aborted = in_flight.len(),
                "Grace period elapsed; aborting in-flight events"
            );
            in_flight.abort_all();
        }

        tracing::info!("Background event processor stopped");
        Ok(())
    }

    /// Handles one event with the configured retry policy.
    pub async fn process_event(&self, event: QueuedEvent) -> ProcessingOutcome {
        handle_with_retry(&self.handlers, &self.config.retry, event).await
    }
}

fn log_join_result(joined: std::result::Result<ProcessingOutcome, tokio::task::JoinError>) {
    if let Err(e) = joined
        && e.is_panic()
    {
        tracing::error!(error = %e, "Event handler panicked");
    }
}

#[tracing::instrument(skip_all, fields(event_id = %event.id, event_type = %event.event_type))]
async fn handle_with_retry(
    handlers: &HandlerRegistry,
    retry: &RetryPolicy,
    event: QueuedEvent,
) -> ProcessingOutcome {
    let Some(handler) = handlers.get(&event.event_type) else {
        tracing::warn!("No handler registered for event type; dropping");
        metrics::counter!("background_events_processed_total", "outcome" => "dropped")
            .increment(1);
        return ProcessingOutcome::Dropped;
    };

    let started = Instant::now();
    let mut attempt = 0;
    let outcome = loop {
        attempt += 1;
        match handler.handle(&event).await {
            Ok(()) => break ProcessingOutcome::Handled { attempts: attempt },
            Err(error) if !error.is_retryable() || !retry.should_retry(attempt) => {
                tracing::error!(
                    handler = handler.name(),
                    attempts = attempt,
                    error = %error,
                    "Event handling failed permanently"
                );
                break ProcessingOutcome::Failed {
                    attempts: attempt,
                    error,
                };
            }
            Err(error) => {
                let delay = retry.delay_after(attempt);
                tracing::warn!(
                    handler = handler.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Event handling failed; retrying"
                );
                metrics::counter!("background_handler_retries_total").increment(1);
                tokio::time::sleep(delay).await;
            }
        }
    };

    metrics::histogram!("background_event_duration_seconds")
        .record(started.elapsed().as_secs_f64());
    metrics::counter!("background_events_processed_total", "outcome" => outcome.label())
        .increment(1);
    outcome
}
