// crates/core/src/generator/command.rs
//! Generator that delegates to an external program.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{GenerationError, GenerationRequest, Generator};

/// Runs a configured program once per job.
///
/// The program receives the job parameters as JSON on stdin, runs with the
/// scratch directory as its working directory (also exported as
/// `SCRATCH_DIR`, with `JOB_ID`), and prints the produced file's path as the
/// last line of stdout. The child is killed if the caller stops waiting.
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a whitespace-separated command line. Returns `None` when empty.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

fn tail(bytes: &[u8], max_chars: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    let count = text.chars().count();
    if count <= max_chars {
        text.to_string()
    } else {
        text.chars().skip(count - max_chars).collect()
    }
}

#[async_trait]
impl Generator for CommandGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<PathBuf, GenerationError> {
        let input = serde_json::to_vec(&request.params)
            .map_err(|e| GenerationError::new(format!("encode params: {e}")))?;

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .current_dir(&request.scratch_dir)
            .env("SCRATCH_DIR", &request.scratch_dir)
            .env("JOB_ID", request.job_id.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                tracing::error!(program = %self.program, error = %e, "Failed to spawn generator");
                GenerationError::new(format!("failed to spawn {}: {e}", self.program))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // Programs may ignore stdin and close it early.
            if let Err(e) = stdin.write_all(&input).await {
                tracing::debug!(job_id = %request.job_id, error = %e, "Generator closed stdin early");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| GenerationError::new(format!("failed to wait for generator: {e}")))?;

        if !output.status.success() {
            tracing::warn!(
                job_id = %request.job_id,
                exit_code = ?output.status.code(),
                "Generator exited with failure"
            );
            return Err(GenerationError::new(format!(
                "generator exited with {}: {}",
                output.status,
                tail(&output.stderr, 500)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .ok_or_else(|| GenerationError::new("generator printed no artifact path"))?;

        Ok(request.scratch_dir.join(line))
    }

    fn name(&self) -> &str {
        &self.program
    }
}
