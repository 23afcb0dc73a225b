// crates/core/src/scratch.rs
//! Per-job scratch directories under a shared root.

use std::path::{Path, PathBuf};

use crate::error::ScratchError;
use crate::job::JobId;

const ALLOCATION_PREFIX: &str = "job-";

/// Allocates and reclaims job-scoped directories under `root`.
#[derive(Debug, Clone)]
pub struct ScratchManager {
    root: PathBuf,
}

impl ScratchManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root if absent and sweep allocations left behind by a
    /// previous process. Returns how many stale directories were removed.
    pub async fn init(&self) -> Result<usize, ScratchError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ScratchError::io(&self.root, e))?;

        let mut removed = 0;
        for path in self.allocations().await? {
            release_path(&path).await?;
            removed += 1;
        }
        if removed > 0 {
            tracing::warn!(root = %self.root.display(), removed, "Swept stale scratch directories");
        }
        Ok(removed)
    }

    /// Allocate the directory for `job`. Fails if it already exists, so two
    /// live allocations can never share a path.
    pub async fn allocate(&self, job: &JobId) -> Result<ScratchAllocation, ScratchError> {
        let path = self.root.join(format!("{ALLOCATION_PREFIX}{job}"));
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| ScratchError::io(&path, e))?;
        tracing::debug!(job_id = %job, path = %path.display(), "Allocated scratch directory");
        Ok(ScratchAllocation {
            path,
            released: false,
        })
    }

    /// Write and remove a marker file to prove the root is usable.
    pub async fn check_writable(&self) -> Result<(), ScratchError> {
        let marker = self
            .root
            .join(format!(".writable-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&marker, b"ok")
            .await
            .map_err(|source| ScratchError::NotWritable {
                path: self.root.clone(),
                source,
            })?;
        tokio::fs::remove_file(&marker)
            .await
            .map_err(|e| ScratchError::io(&marker, e))
    }

    /// Paths of every allocation currently on disk.
    pub async fn allocations(&self) -> Result<Vec<PathBuf>, ScratchError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| ScratchError::io(&self.root, e))?;
        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ScratchError::io(&self.root, e))?
        {
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with(ALLOCATION_PREFIX)
            {
                out.push(entry.path());
            }
        }
        Ok(out)
    }
}

/// A job's scratch directory. Removed on [`release`](Self::release), or on
/// drop if the owner never got that far.
#[derive(Debug)]
pub struct ScratchAllocation {
    path: PathBuf,
    released: bool,
}

impl ScratchAllocation {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the directory tree. Safe to call more than once.
    pub async fn release(&mut self) -> Result<(), ScratchError> {
        release_path(&self.path).await?;
        self.released = true;
        Ok(())
    }
}

impl Drop for ScratchAllocation {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {
                tracing::warn!(path = %self.path.display(), "Scratch directory released on drop")
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Failed to release scratch directory on drop")
            }
        }
    }
}

/// Recursively delete `path`; a missing path counts as success.
pub async fn release_path(path: &Path) -> Result<(), ScratchError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ScratchError::io(path, e)),
    }
}
