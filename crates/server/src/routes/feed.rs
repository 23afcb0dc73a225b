//! GET /feed.rss - RSS feed of completed episodes.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use episode_forge_core::RSS_CONTENT_TYPE;

use crate::state::AppState;

/// Rendered on demand from the retained Done jobs.
async fn feed(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, RSS_CONTENT_TYPE)],
        state.orchestrator.feed(),
    )
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/feed.rss", get(feed))
}
