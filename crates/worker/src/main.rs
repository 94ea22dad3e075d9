//! Registration worker entry point.

use std::sync::Arc;

use common::shutdown_channel;
use dispatch::{InMemoryMessageQueue, MessageQueue, PostgresMessageQueue};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{LoggingEventBus, OutboxProcessor};
use sqlx::postgres::PgPoolOptions;
use store::{InMemoryStore, OutboxStore, PostgresStore, RegistrationStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use worker::config::{Config, QueueBackend};
use worker::routes::health::WorkerInfo;
use worker::routes::operator::AppState;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Runs the processors and the HTTP listener until shutdown.
async fn serve<S>(
    store: S,
    queue: Arc<dyn MessageQueue>,
    config: Config,
    metrics_handle: PrometheusHandle,
) where
    S: RegistrationStore + OutboxStore + Clone + 'static,
{
    let components = worker::build_components(store.clone(), queue, &config);
    let (trigger, signal) = shutdown_channel();

    let background = components.background.clone();
    let background_signal = signal.clone();
    let background_task = tokio::spawn(async move {
        if let Err(e) = background.run(background_signal).await {
            tracing::error!(error = %e, "background processor stopped with error");
        }
    });

    let outbox = OutboxProcessor::new(
        store.clone(),
        Arc::new(LoggingEventBus),
        config.outbox_config(),
    )
    .expect("invalid outbox configuration");
    let outbox_task = tokio::spawn(async move { outbox.run(signal).await });

    let state = Arc::new(AppState {
        service: components.service,
        store,
    });
    let app = worker::create_app(state, Arc::new(WorkerInfo::new(&config.worker_id)), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, worker_id = %config.worker_id, "starting registration worker");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            trigger.trigger();
        })
        .await
        .expect("server error");

    let (background, outbox) = tokio::join!(background_task, outbox_task);
    if let Err(e) = background {
        tracing::error!(error = %e, "background processor task panicked");
    }
    if let Err(e) = outbox {
        tracing::error!(error = %e, "outbox processor task panicked");
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Select backends and run
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(16)
                .connect(&url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresStore::new(pool.clone());
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");

            let queue: Arc<dyn MessageQueue> = match config.queue_backend {
                QueueBackend::Postgres => {
                    Arc::new(PostgresMessageQueue::new(pool, config.queue_poll_timeout))
                }
                QueueBackend::Memory => Arc::new(InMemoryMessageQueue::new(config.queue_poll_timeout)),
            };
            tracing::info!(queue = ?config.queue_backend, "using PostgreSQL store");
            serve(store, queue, config, metrics_handle).await;
        }
        None => {
            assert!(
                config.queue_backend == QueueBackend::Memory,
                "QUEUE_BACKEND=postgres requires DATABASE_URL"
            );
            tracing::warn!("DATABASE_URL not set; using in-memory store and queue");
            let queue: Arc<dyn MessageQueue> =
                Arc::new(InMemoryMessageQueue::new(config.queue_poll_timeout));
            serve(InMemoryStore::new(), queue, config, metrics_handle).await;
        }
    }

    tracing::info!("worker shut down gracefully");
}
