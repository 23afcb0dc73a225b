// crates/core/src/lib.rs
pub mod config;
pub mod error;
pub mod feed;
pub mod generator;
pub mod health;
pub mod job;
pub mod orchestrator;
pub mod retry;
pub mod scratch;
pub mod store;

pub use config::*;
pub use error::*;
pub use feed::{render_feed, FeedConfig, RSS_CONTENT_TYPE};
pub use health::{HealthReport, HealthState};
pub use job::*;
pub use orchestrator::{JobOrchestrator, OrchestratorConfig};
pub use retry::RetryPolicy;
pub use scratch::{ScratchAllocation, ScratchManager};
pub use store::{ObjectRef, ObjectStore, StoreError};
