// crates/server/src/routes/jobs.rs
//! Job submission and status routes.
//!
//! - POST /jobs - admit a job, 202 with its Pending snapshot
//! - GET /jobs - list retained jobs
//! - GET /jobs/{id} - poll a single job

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use episode_forge_core::{JobId, JobParams, JobSnapshot};
use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Job parameters must be a JSON object.
fn params_from(value: Value) -> ApiResult<JobParams> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ApiError::InvalidRequest(format!(
            "Job parameters must be a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// POST /jobs - Submit a job. Returns before any work starts.
async fn submit_job(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = payload?;
    let params = params_from(body)?;
    let snapshot = state.orchestrator.submit(params)?;
    let location = format!("/jobs/{}", snapshot.id);
    Ok((
        StatusCode::ACCEPTED,
        [(header::LOCATION, location)],
        Json(snapshot),
    ))
}

/// GET /jobs/{id} - Current snapshot of a job.
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    state
        .orchestrator
        .get(&JobId::from(id.as_str()))
        .map(Json)
        .ok_or(ApiError::JobNotFound(id))
}

/// GET /jobs - All retained jobs, newest first.
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobSnapshot>> {
    Json(state.orchestrator.list())
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs).post(submit_job))
        .route("/jobs/{id}", get(get_job))
}
