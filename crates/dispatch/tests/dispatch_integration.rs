//! Dispatcher and background processor behaviour with in-memory queues.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{EventId, RegistrantId, shutdown_channel};
use dispatch::{
    BackgroundEventProcessor, DispatchError, EventDispatcher, EventHandler, HandlerError,
    HandlerRegistry, InMemoryMessageQueue, MessageQueue, ProcessingOutcome, ProcessorConfig,
    QueuedEvent, RetryPolicy,
};
use domain::{EventSource, Registration, event_types};
use tokio::sync::Mutex;

/// Records every event it sees; fails the first `failures` calls.
struct RecordingHandler {
    seen: Mutex<Vec<QueuedEvent>>,
    calls: AtomicU32,
    failures: u32,
    permanent: bool,
    delay: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingHandler {
    fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
            failures: 0,
            permanent: false,
            delay: Duration::ZERO,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn failing(failures: u32) -> Self {
        Self {
            failures,
            ..Self::new()
        }
    }

    fn permanent() -> Self {
        Self {
            failures: u32::MAX,
            permanent: true,
            ..Self::new()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    async fn seen_types(&self) -> Vec<String> {
        self.seen
            .lock()
            .await
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn handle(&self, event: &QueuedEvent) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if call <= self.failures {
            return Err(if self.permanent {
                HandlerError::permanent("rejected")
            } else {
                HandlerError::retryable("flaky")
            });
        }
        self.seen.lock().await.push(event.clone());
        Ok(())
    }
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        exponential: true,
        max_delay: Duration::from_millis(10),
    }
}

fn queued_event(event_type: &str) -> QueuedEvent {
    let mut registration = Registration::confirmed(EventId::new(), RegistrantId::new(), Utc::now());
    let event = registration.take_events().remove(0);
    let mut queued = QueuedEvent::from_domain(&event).unwrap();
    queued.event_type = event_type.to_string();
    queued
}

/// A cancelled registration that was waitlisted carries Waitlisted + Cancelled events.
fn cancelled_waitlisted() -> Registration {
    let mut registration =
        Registration::waitlisted(EventId::new(), RegistrantId::new(), 1, Utc::now()).unwrap();
    registration.cancel(Utc::now()).unwrap();
    registration
}

#[tokio::test]
async fn inline_events_run_before_return_and_others_are_queued() {
    let inline_handler = Arc::new(RecordingHandler::new());
    let mut inline = HandlerRegistry::new();
    inline.register_processor(event_types::REGISTRATION_CANCELLED, inline_handler.clone());

    let queue = InMemoryMessageQueue::default();
    let dispatcher = EventDispatcher::new(
        inline,
        Arc::new(HandlerRegistry::new()),
        Arc::new(queue.clone()),
    );

    let mut entities = vec![cancelled_waitlisted()];
    let report = dispatcher.dispatch_and_clear(&mut entities).await.unwrap();

    assert_eq!(report.inline, 1);
    assert_eq!(report.queued, 1);
    assert_eq!(inline_handler.seen_types().await, vec!["RegistrationCancelled"]);
    assert_eq!(queue.len().await, 1);
    assert!(!entities[0].has_pending_events());
}

#[tokio::test]
async fn second_dispatch_of_same_entities_routes_nothing() {
    let queue = InMemoryMessageQueue::default();
    let dispatcher = EventDispatcher::new(
        HandlerRegistry::new(),
        Arc::new(HandlerRegistry::new()),
        Arc::new(queue.clone()),
    );

    let mut entities = vec![cancelled_waitlisted(), cancelled_waitlisted()];
    let first = dispatcher.dispatch_and_clear(&mut entities).await.unwrap();
    let second = dispatcher.dispatch_and_clear(&mut entities).await.unwrap();

    assert_eq!(first.queued, 4);
    assert_eq!(second, Default::default());
    assert_eq!(queue.len().await, 4);
}

#[tokio::test]
async fn inline_handler_error_propagates_after_all_events_routed() {
    let mut inline = HandlerRegistry::new();
    inline.register_processor(
        event_types::REGISTRATION_WAITLISTED,
        Arc::new(RecordingHandler::permanent()),
    );

    let queue = InMemoryMessageQueue::default();
    let dispatcher = EventDispatcher::new(
        inline,
        Arc::new(HandlerRegistry::new()),
        Arc::new(queue.clone()),
    );

    let mut entities = vec![cancelled_waitlisted()];
    let err = dispatcher.dispatch_and_clear(&mut entities).await.unwrap_err();

    assert!(matches!(err, DispatchError::Handler(HandlerError::Permanent(_))));
    // The cancellation after the failing event was still queued
    assert_eq!(queue.len().await, 1);
    assert!(!entities[0].has_pending_events());
}

#[tokio::test]
async fn enqueue_failure_falls_back_to_inline_handling() {
    let background = Arc::new(RecordingHandler::new());
    let mut queued = HandlerRegistry::new();
    queued.register_processor(event_types::REGISTRATION_WAITLISTED, background.clone());

    let queue = InMemoryMessageQueue::default();
    queue.set_unavailable(true);
    let dispatcher = EventDispatcher::new(
        HandlerRegistry::new(),
        Arc::new(queued),
        Arc::new(queue.clone()),
    );

    let mut entities = vec![cancelled_waitlisted()];
    let report = dispatcher.dispatch_and_clear(&mut entities).await.unwrap();

    assert_eq!(report.fallback, 1);
    assert_eq!(report.dropped, 1);
    assert_eq!(background.seen_types().await, vec!["RegistrationWaitlisted"]);
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn process_event_retries_transient_failures() {
    let handler = Arc::new(RecordingHandler::failing(2));
    let mut handlers = HandlerRegistry::new();
    handlers.register_processor("Flaky", handler.clone());

    let processor = BackgroundEventProcessor::new(
        Arc::new(InMemoryMessageQueue::default()),
        Arc::new(handlers),
        ProcessorConfig {
            retry: fast_retry(3),
            ..ProcessorConfig::default()
        },
    );

    let outcome = processor.process_event(queued_event("Flaky")).await;
    assert_eq!(outcome, ProcessingOutcome::Handled { attempts: 3 });
}

#[tokio::test]
async fn process_event_gives_up_after_max_attempts() {
    let handler = Arc::new(RecordingHandler::failing(10));
    let mut handlers = HandlerRegistry::new();
    handlers.register_processor("Flaky", handler.clone());

    let processor = BackgroundEventProcessor::new(
        Arc::new(InMemoryMessageQueue::default()),
        Arc::new(handlers),
        ProcessorConfig {
            retry: fast_retry(3),
            ..ProcessorConfig::default()
        },
    );

    let outcome = processor.process_event(queued_event("Flaky")).await;
    assert!(matches!(outcome, ProcessingOutcome::Failed { attempts: 3, .. }));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let handler = Arc::new(RecordingHandler::permanent());
    let mut handlers = HandlerRegistry::new();
    handlers.register_processor("Broken", handler.clone());

    let processor = BackgroundEventProcessor::new(
        Arc::new(InMemoryMessageQueue::default()),
        Arc::new(handlers),
        ProcessorConfig {
            retry: fast_retry(5),
            ..ProcessorConfig::default()
        },
    );

    let outcome = processor.process_event(queued_event("Broken")).await;
    assert!(matches!(outcome, ProcessingOutcome::Failed { attempts: 1, .. }));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_event_type_is_dropped() {
    let processor = BackgroundEventProcessor::new(
        Arc::new(InMemoryMessageQueue::default()),
        Arc::new(HandlerRegistry::new()),
        ProcessorConfig::default(),
    );

    assert_eq!(
        processor.process_event(queued_event("Nobody")).await,
        ProcessingOutcome::Dropped
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_respects_concurrency_limit_and_drains_on_shutdown() {
    let handler = Arc::new(RecordingHandler::slow(Duration::from_millis(50)));
    let mut handlers = HandlerRegistry::new();
    handlers.register_processor("Slow", handler.clone());

    let queue = InMemoryMessageQueue::new(Duration::from_millis(20));
    for _ in 0..10 {
        queue.enqueue(&queued_event("Slow")).await.unwrap();
    }

    let processor = Arc::new(BackgroundEventProcessor::new(
        Arc::new(queue.clone()),
        Arc::new(handlers),
        ProcessorConfig {
            max_concurrency: 3,
            shutdown_grace: Duration::from_secs(5),
            ..ProcessorConfig::default()
        },
    ));

    let (trigger, signal) = shutdown_channel();
    let running = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.run(signal).await })
    };

    // Wait until the queue has been drained by the processor
    tokio::time::timeout(Duration::from_secs(5), async {
        while !queue.is_empty().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    trigger.trigger();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(handler.seen.lock().await.len(), 10);
    assert!(handler.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(processor.available_slots(), 3);
}

#[tokio::test]
async fn run_exits_promptly_when_idle() {
    let processor = BackgroundEventProcessor::new(
        Arc::new(InMemoryMessageQueue::new(Duration::from_secs(60))),
        Arc::new(HandlerRegistry::new()),
        ProcessorConfig::default(),
    );

    let (trigger, signal) = shutdown_channel();
    trigger.trigger();
    tokio::time::timeout(Duration::from_secs(1), processor.run(signal))
        .await
        .unwrap()
        .unwrap();
}
