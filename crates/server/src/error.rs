// crates/server/src/error.rs
use axum::{
    extract::rejection::JsonRejection,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use episode_forge_core::SubmitError;
use serde::Serialize;
use thiserror::Error;

/// Seconds a client should wait before resubmitting after a 503.
pub const RETRY_AFTER_SECS: u64 = 5;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Overloaded: {limit} jobs in flight")]
    Overloaded { limit: usize },

    #[error("Shutting down")]
    ShuttingDown,

    #[error("Job not found: {0}")]
    JobNotFound(String),
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Overloaded { limit } => ApiError::Overloaded { limit },
            SubmitError::ShuttingDown => ApiError::ShuttingDown,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        // Oversized bodies surface here too and are reported as invalid input.
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::InvalidRequest(msg) => {
                tracing::warn!(message = %msg, "Invalid request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Invalid request", msg.clone()),
                )
            }
            ApiError::Overloaded { limit } => {
                let body = ErrorResponse::with_details(
                    "Overloaded",
                    format!("{limit} jobs already in flight; retry later"),
                );
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    [(header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())],
                    Json(body),
                )
                    .into_response();
            }
            ApiError::ShuttingDown => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::with_details("Shutting down", "Service is not accepting new jobs"),
            ),
            ApiError::JobNotFound(id) => {
                tracing::debug!(job_id = %id, "Job not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Job not found", format!("Job ID: {}", id)),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
