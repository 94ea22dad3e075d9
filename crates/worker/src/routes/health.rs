//! Liveness endpoint.

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

/// Identity of the running worker, reported by the health check.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub worker_id: String,
    pub started_at: Instant,
}

impl WorkerInfo {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            started_at: Instant::now(),
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub worker_id: String,
    pub uptime_secs: u64,
}

/// GET /health: the worker is up and serving.
pub async fn check(State(info): State<Arc<WorkerInfo>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        worker_id: info.worker_id.clone(),
        uptime_secs: info.started_at.elapsed().as_secs(),
    })
}
