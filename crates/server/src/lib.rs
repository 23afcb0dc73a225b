// crates/server/src/lib.rs
//! Episode-forge server library.
//!
//! Axum HTTP surface over the job orchestrator: fire-and-poll job
//! submission, status lookup, readiness and Prometheus metrics.

pub mod error;
pub mod metrics;
pub mod observability;
pub mod routes;
pub mod shutdown;
pub mod state;

pub use error::*;
pub use self::metrics::install_recorder;
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// Request bodies above `max_body_bytes` are rejected before parsing.
pub fn create_app(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    api_routes(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}
