//! GET /metrics - Prometheus scrape target.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::metrics::{scrape, EXPOSITION_CONTENT_TYPE};
use crate::state::AppState;

/// Rendered Prometheus text.
pub struct Exposition(pub String);

impl IntoResponse for Exposition {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)], self.0).into_response()
    }
}

/// 503 until the recorder is installed.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<Exposition, (StatusCode, &'static str)> {
    scrape(&state.orchestrator)
        .map(Exposition)
        .ok_or((StatusCode::SERVICE_UNAVAILABLE, "Metrics recorder not installed"))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(metrics_handler))
}
