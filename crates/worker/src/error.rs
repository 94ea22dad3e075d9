//! Worker error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dispatch::DispatchError;
use store::StoreError;
use thiserror::Error;
use waitlist::WaitlistError;

/// Failure of a registration command run through [`crate::RegistrationService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The command was rejected and nothing was committed.
    #[error(transparent)]
    Waitlist(#[from] WaitlistError),

    /// The command committed but a synchronous handler failed afterwards.
    #[error("Committed, but dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Result type for registration service calls.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Error returned by the operator endpoints.
#[derive(Debug)]
pub enum ApiError {
    Store(StoreError),
    Waitlist(WaitlistError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Store(err) => store_error_to_response(err),
            ApiError::Waitlist(WaitlistError::EventNotFound(id)) => {
                (StatusCode::NOT_FOUND, format!("Event not found: {id}"))
            }
            ApiError::Waitlist(WaitlistError::Store(err)) => store_error_to_response(err),
            ApiError::Waitlist(err) => (StatusCode::BAD_REQUEST, err.to_string()),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn store_error_to_response(err: StoreError) -> (StatusCode, String) {
    match &err {
        StoreError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => {
            tracing::error!(error = %err, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl From<WaitlistError> for ApiError {
    fn from(err: WaitlistError) -> Self {
        ApiError::Waitlist(err)
    }
}
