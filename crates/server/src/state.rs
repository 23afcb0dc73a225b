// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use episode_forge_core::{HealthState, JobOrchestrator};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Owns job admission, execution and lookup.
    pub orchestrator: Arc<JobOrchestrator>,
    /// Cached readiness, written by startup and the self-check loop.
    pub health: Arc<HealthState>,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(orchestrator: Arc<JobOrchestrator>, health: Arc<HealthState>) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            orchestrator,
            health,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
