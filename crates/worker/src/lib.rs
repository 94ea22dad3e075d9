//! Registration worker: wiring, observability endpoints and the
//! registration service.
//!
//! The worker owns the composition root. It builds the allocator, the
//! dispatcher and its handler registries, the background event processor and
//! the outbox processor, and serves `/health`, `/metrics` and the operator
//! queries over HTTP.

pub mod config;
pub mod error;
pub mod notifier;
pub mod routes;
pub mod service;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use dispatch::{
    BackgroundEventProcessor, EventDispatcher, HandlerRegistry, MessageQueue,
};
use domain::event_types;
use metrics_exporter_prometheus::PrometheusHandle;
use store::{OutboxStore, RegistrationStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use waitlist::WaitlistAllocator;

use config::Config;
use notifier::{NotificationLog, RegistrantNotifier};
use routes::health::WorkerInfo;
use routes::operator::AppState;
use service::RegistrationService;

pub use error::{ApiError, Result, ServiceError};

/// Event types whose handler runs before the command returns.
pub const INLINE_EVENT_TYPES: &[&str] = &[event_types::REGISTRATION_CANCELLED];

/// Event types handled by the background processor.
pub const QUEUED_EVENT_TYPES: &[&str] = &[
    event_types::REGISTRATION_CONFIRMED,
    event_types::REGISTRATION_WAITLISTED,
    event_types::REGISTRATION_PROMOTED,
    event_types::WAITLIST_POSITION_CHANGED,
];

/// Builds the inline and queued handler registries.
///
/// Cancellation notices are inline so the caller's response already reflects
/// them; every other notification is fan-out and goes through the queue.
pub fn build_handlers(notifications: &NotificationLog) -> (HandlerRegistry, Arc<HandlerRegistry>) {
    let notifier = Arc::new(RegistrantNotifier::new(notifications.clone()));

    let mut inline = HandlerRegistry::new();
    for event_type in INLINE_EVENT_TYPES {
        inline.register_processor(*event_type, notifier.clone());
    }

    let mut queued = HandlerRegistry::new();
    for event_type in QUEUED_EVENT_TYPES {
        queued.register_processor(*event_type, notifier.clone());
    }

    (inline, Arc::new(queued))
}

/// Everything the worker runs, wired together.
pub struct Components<S: RegistrationStore> {
    pub service: Arc<RegistrationService<S>>,
    pub background: Arc<BackgroundEventProcessor>,
    pub notifications: NotificationLog,
}

/// Wires the registration service and the background processor around one
/// store and one queue.
pub fn build_components<S: RegistrationStore>(
    store: S,
    queue: Arc<dyn MessageQueue>,
    config: &Config,
) -> Components<S> {
    let notifications = NotificationLog::new();
    let (inline, queued) = build_handlers(&notifications);

    let dispatcher = EventDispatcher::new(inline, queued.clone(), queue.clone());
    let service = RegistrationService::new(WaitlistAllocator::new(store), dispatcher);
    let background = BackgroundEventProcessor::new(queue, queued, config.processor_config());

    Components {
        service: Arc::new(service),
        background: Arc::new(background),
        notifications,
    }
}

/// Creates the Axum application router.
pub fn create_app<S>(
    state: Arc<AppState<S>>,
    info: Arc<WorkerInfo>,
    metrics_handle: PrometheusHandle,
) -> Router
where
    S: RegistrationStore + OutboxStore + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    let health_router = Router::new()
        .route("/health", get(routes::health::check))
        .with_state(info);

    Router::new()
        .route("/outbox/stats", get(routes::operator::outbox_stats::<S>))
        .route(
            "/events/{id}/registrations",
            get(routes::operator::registrations::<S>),
        )
        .with_state(state)
        .merge(health_router)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
