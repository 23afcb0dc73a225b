//! API route handlers for the episode-forge server.

pub mod feed;
pub mod health;
pub mod jobs;
pub mod metrics;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router.
///
/// Routes:
/// - POST /jobs - Submit a generation job (202 + snapshot)
/// - GET  /jobs - List retained jobs, newest first
/// - GET  /jobs/{id} - Job status snapshot
/// - GET  /feed.rss - RSS feed of completed episodes
/// - GET  /health - Readiness and self-check freshness
/// - GET  /metrics - Prometheus exposition
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(jobs::router())
        .merge(feed::router())
        .merge(health::router())
        .merge(metrics::router())
        .with_state(state)
}
