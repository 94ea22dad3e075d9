//! Routes drained domain events to inline handlers or the message queue.

use std::sync::Arc;

use domain::EventSource;

use crate::event::QueuedEvent;
use crate::handler::HandlerRegistry;
use crate::queue::MessageQueue;
use crate::{DispatchError, Result};

/// How a dispatch call routed its events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Events handled synchronously by an inline handler.
    pub inline: usize,

    /// Events placed on the message queue.
    pub queued: usize,

    /// Events handled synchronously because enqueueing failed.
    pub fallback: usize,

    /// Events with no inline handler that could be neither queued nor handled.
    pub dropped: usize,
}

/// Moves events off entities after their unit of work has committed.
///
/// Event types with an inline handler run before the call returns; handler
/// errors propagate to the caller. Every other event is enqueued for the
/// background processor. If the queue rejects an event, its background
/// handler runs inline instead of the event being lost.
pub struct EventDispatcher {
    inline: HandlerRegistry,
    queued: Arc<HandlerRegistry>,
    queue: Arc<dyn MessageQueue>,
}

impl EventDispatcher {
    /// Creates a dispatcher.
    ///
    /// `queued` must be the registry the background processor uses, so the
    /// enqueue fallback runs the same handler the processor would.
    pub fn new(
        inline: HandlerRegistry,
        queued: Arc<HandlerRegistry>,
        queue: Arc<dyn MessageQueue>,
    ) -> Self {
        Self {
            inline,
            queued,
            queue,
        }
    }

    /// Drains every entity's events and routes each one exactly once.
    ///
    /// All events are routed even if an inline handler fails; the first
    /// failure is returned afterwards.
    #[tracing::instrument(skip_all, fields(entities = entities.len()))]
    pub async fn dispatch_and_clear<S: EventSource>(
        &self,
        entities: &mut [S],
    ) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        let mut first_error = None;

        for entity in entities.iter_mut() {
            for event in entity.take_events() {
                let routed = match QueuedEvent::from_domain(&event) {
                    Ok(queued) => self.route(queued, &mut report).await,
                    Err(e) => Err(DispatchError::from(e)),
                };
                if let Err(e) = routed {
                    tracing::error!(error = %e, "Event dispatch failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn route(&self, event: QueuedEvent, report: &mut DispatchReport) -> Result<()> {
        if let Some(handler) = self.inline.get(&event.event_type) {
            metrics::counter!("dispatch_events_total", "mode" => "inline").increment(1);
            report.inline += 1;
            tracing::debug!(event_type = %event.event_type, handler = handler.name(), "Handling inline");
            return handler.handle(&event).await.map_err(DispatchError::from);
        }

        let enqueue_error = match self.queue.enqueue(&event).await {
            Ok(()) => {
                metrics::counter!("dispatch_events_total", "mode" => "queued").increment(1);
                report.queued += 1;
                return Ok(());
            }
            Err(e) => e,
        };

        metrics::counter!("dispatch_enqueue_fallbacks_total").increment(1);
        let Some(handler) = self.queued.get(&event.event_type) else {
            tracing::warn!(
                event_type = %event.event_type,
                error = %enqueue_error,
                "Enqueue failed and no handler is registered; dropping event"
            );
            report.dropped += 1;
            return Ok(());
        };

        tracing::warn!(
            event_type = %event.event_type,
            error = %enqueue_error,
            handler = handler.name(),
            "Enqueue failed; handling inline"
        );
        metrics::counter!("dispatch_events_total", "mode" => "fallback").increment(1);
        report.fallback += 1;
        handler.handle(&event).await.map_err(DispatchError::from)
    }
}
