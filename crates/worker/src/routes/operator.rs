//! Read-only operator queries.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::EventId;
use domain::Registration;
use store::{OutboxCounts, OutboxStore, RegistrationStore};

use crate::error::ApiError;
use crate::service::RegistrationService;

/// Shared state for the operator routes.
pub struct AppState<S: RegistrationStore + OutboxStore> {
    pub service: Arc<RegistrationService<S>>,
    pub store: S,
}

/// GET /outbox/stats: outbox rows per status. Failed rows need an operator.
pub async fn outbox_stats<S: RegistrationStore + OutboxStore>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<OutboxCounts>, ApiError> {
    let counts = state.store.count_by_status().await?;
    Ok(Json(counts))
}

/// GET /events/{id}/registrations: every registration of an event, oldest first.
pub async fn registrations<S: RegistrationStore + OutboxStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(event_id): Path<EventId>,
) -> Result<Json<Vec<Registration>>, ApiError> {
    let registrations = state.service.allocator().registrations(event_id).await?;
    Ok(Json(registrations))
}
