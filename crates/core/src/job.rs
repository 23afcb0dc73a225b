// crates/core/src/job.rs
//! Job model and its state machine.
//!
//! Pending → Running → Uploading → {Done | Failed}. Running and Pending may
//! also fail directly. Done and Failed are terminal.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::ObjectRef;

/// Opaque key-value parameters handed to the generation capability.
pub type JobParams = serde_json::Map<String, serde_json::Value>;

/// Unique, opaque job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic object-store key for a job's artifact.
pub fn object_key(prefix: &str, id: &JobId) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        id.to_string()
    } else {
        format!("{prefix}/{id}")
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Uploading,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Uploading)
                | (Running, Failed)
                | (Uploading, Done)
                | (Uploading, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Uploading => "uploading",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job ended up in [`JobStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFailure {
    Generation(String),
    GenerationTimeout(Duration),
    UploadFailed(String),
    ShutdownInterrupted,
    Scratch(String),
    /// The job record was not in the state the pipeline expected.
    Internal(String),
}

impl JobFailure {
    /// Stable, machine-readable failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Generation(_) => "GenerationError",
            Self::GenerationTimeout(_) => "GenerationTimeout",
            Self::UploadFailed(_) => "UploadFailed",
            Self::ShutdownInterrupted => "ShutdownInterrupted",
            Self::Scratch(_) => "ScratchError",
            Self::Internal(_) => "InternalError",
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generation(detail) => write!(f, "GenerationError: {detail}"),
            Self::GenerationTimeout(after) => {
                write!(f, "GenerationTimeout: no artifact after {}s", after.as_secs())
            }
            Self::UploadFailed(detail) => write!(f, "UploadFailed: {detail}"),
            Self::ShutdownInterrupted => f.write_str("ShutdownInterrupted"),
            Self::Scratch(detail) => write!(f, "ScratchError: {detail}"),
            Self::Internal(detail) => write!(f, "InternalError: {detail}"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Illegal job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// A single unit of generation-and-publish work.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    status: JobStatus,
    params: JobParams,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    /// Monotonic terminal instant, used for retention.
    finished: Option<tokio::time::Instant>,
    result: Option<ObjectRef>,
    failure: Option<JobFailure>,
    upload_attempts: u32,
}

impl Job {
    pub fn new(id: JobId, params: JobParams) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            params,
            created_at: Utc::now(),
            completed_at: None,
            finished: None,
            result: None,
            failure: None,
            upload_attempts: 0,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn params(&self) -> &JobParams {
        &self.params
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        self.failure.as_ref()
    }

    fn advance(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
            self.finished = Some(tokio::time::Instant::now());
        }
        Ok(())
    }

    /// Pending → Running.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.advance(JobStatus::Running)
    }

    /// Running → Uploading.
    pub fn begin_upload(&mut self) -> Result<(), TransitionError> {
        self.advance(JobStatus::Uploading)
    }

    /// Uploading → Done, recording where the artifact landed.
    pub fn complete(&mut self, result: ObjectRef, attempts: u32) -> Result<(), TransitionError> {
        self.advance(JobStatus::Done)?;
        self.result = Some(result);
        self.upload_attempts = attempts;
        Ok(())
    }

    /// Any non-terminal status → Failed.
    pub fn fail(&mut self, failure: JobFailure, attempts: u32) -> Result<(), TransitionError> {
        self.advance(JobStatus::Failed)?;
        self.failure = Some(failure);
        self.upload_attempts = attempts;
        Ok(())
    }

    /// True once a terminal job has outlived the retention window.
    pub fn is_expired(&self, retention: Duration, now: tokio::time::Instant) -> bool {
        self.finished
            .is_some_and(|at| now.saturating_duration_since(at) >= retention)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            status: self.status,
            params: self.params.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
            result_ref: self.result.as_ref().map(|r| r.key.clone()),
            result_url: self.result.as_ref().and_then(|r| r.url.clone()),
            error: self.failure.as_ref().map(|f| f.to_string()),
            error_kind: self.failure.as_ref().map(|f| f.kind().to_string()),
            upload_attempts: self.upload_attempts,
        }
    }
}

/// Point-in-time view of a job, as returned by the status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub params: JobParams,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub upload_attempts: u32,
}
