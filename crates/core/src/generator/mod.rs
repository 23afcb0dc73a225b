// crates/core/src/generator/mod.rs
//! Generation worker boundary.
//!
//! The content-generation capability is an external collaborator. The core
//! only relies on its contract: given job parameters and a writable
//! directory, produce exactly one file inside that directory or fail.

mod command;
mod transcript;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::job::{JobId, JobParams};

pub use command::CommandGenerator;
pub use transcript::TranscriptGenerator;

/// Input for a single generation run.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub job_id: JobId,
    pub params: JobParams,
    /// Writable, job-private directory the artifact must land in.
    pub scratch_dir: PathBuf,
}

/// Generation failed; the detail is recorded on the job verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct GenerationError(pub String);

impl GenerationError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

/// Produces one artifact per job.
///
/// Implementations are invoked concurrently for different jobs and must not
/// share mutable state between invocations.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the path of the produced file.
    async fn generate(&self, request: GenerationRequest) -> Result<PathBuf, GenerationError>;

    /// Generator name for logging.
    fn name(&self) -> &str;
}

/// Check the returned path names an existing regular file inside
/// `scratch_dir`. Returns the canonical path.
pub async fn verify_artifact(scratch_dir: &Path, artifact: &Path) -> Result<PathBuf, GenerationError> {
    let artifact = if artifact.is_relative() {
        scratch_dir.join(artifact)
    } else {
        artifact.to_path_buf()
    };
    let root = tokio::fs::canonicalize(scratch_dir)
        .await
        .map_err(|e| GenerationError::new(format!("scratch directory unavailable: {e}")))?;
    let resolved = tokio::fs::canonicalize(&artifact)
        .await
        .map_err(|e| GenerationError::new(format!("artifact {} missing: {e}", artifact.display())))?;

    if !resolved.starts_with(&root) {
        return Err(GenerationError::new(format!(
            "artifact {} is outside the scratch directory",
            resolved.display()
        )));
    }
    let meta = tokio::fs::metadata(&resolved)
        .await
        .map_err(|e| GenerationError::new(e.to_string()))?;
    if !meta.is_file() {
        return Err(GenerationError::new(format!(
            "artifact {} is not a regular file",
            resolved.display()
        )));
    }
    Ok(resolved)
}
