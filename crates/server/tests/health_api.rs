//! Readiness behaviour across startup, self-checks and staleness.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use episode_forge_core::generator::{GenerationError, GenerationRequest, Generator};
use episode_forge_core::{
    HealthState, JobOrchestrator, ObjectRef, ObjectStore, OrchestratorConfig, ScratchManager, StoreError,
};
use episode_forge_server::{create_app, AppState};
use serde_json::Value;
use tower::ServiceExt;

struct NeverGenerator;

#[async_trait]
impl Generator for NeverGenerator {
    async fn generate(&self, _request: GenerationRequest) -> Result<PathBuf, GenerationError> {
        Err(GenerationError::new("unused"))
    }

    fn name(&self) -> &str {
        "never"
    }
}

struct NullStore;

#[async_trait]
impl ObjectStore for NullStore {
    async fn upload(&self, _local: &Path, key: &str) -> Result<ObjectRef, StoreError> {
        Ok(ObjectRef {
            key: key.to_string(),
            url: None,
        })
    }

    async fn check_credentials(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

fn app(health: Arc<HealthState>) -> Router {
    let orchestrator = JobOrchestrator::new(
        OrchestratorConfig::default(),
        ScratchManager::new(std::env::temp_dir().join("episode-forge-health-test")),
        Arc::new(NeverGenerator),
        Arc::new(NullStore),
    );
    create_app(AppState::new(orchestrator, health), 1024)
}

async fn fetch_health(app: &Router) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_health_tracks_readiness_and_staleness() {
    let health = Arc::new(HealthState::new(Duration::from_secs(30)));
    let app = app(health.clone());

    // before the startup self-check
    let (status, body) = fetch_health(&app).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unavailable");
    assert_eq!(body["ready"], false);
    assert!(body["lastSelfCheck"].is_null());
    assert_eq!(body["reason"], "not ready");

    health.record_self_check();
    health.mark_ready();
    let (status, body) = fetch_health(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["lastSelfCheck"].is_string());
    assert!(body.get("reason").is_none());
    assert!(body["version"].is_string());

    tokio::time::advance(Duration::from_secs(31)).await;
    let (status, body) = fetch_health(&app).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["reason"].as_str().unwrap().contains("staleness"));

    health.record_self_check();
    assert_eq!(fetch_health(&app).await.0, StatusCode::OK);

    health.mark_not_ready();
    assert_eq!(fetch_health(&app).await.0, StatusCode::SERVICE_UNAVAILABLE);
}
