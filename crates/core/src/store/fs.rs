// crates/core/src/store/fs.rs
//! Filesystem-backed object store for local development.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{validate_key, ObjectRef, ObjectStore, StoreError};

/// Copies artifacts into a local directory, mirroring the key layout.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn classify_io(context: &str, err: std::io::Error) -> StoreError {
    match err.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            StoreError::Permanent(format!("{context}: {err}"))
        }
        _ => StoreError::Transient(format!("{context}: {err}")),
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn upload(&self, local: &Path, key: &str) -> Result<ObjectRef, StoreError> {
        validate_key(key)?;
        let dest = self.root.join(key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| classify_io("create destination", e))?;
        }
        let bytes = tokio::fs::copy(local, &dest)
            .await
            .map_err(|e| classify_io("copy artifact", e))?;
        tracing::debug!(key, bytes, dest = %dest.display(), "Stored artifact on local filesystem");
        Ok(ObjectRef {
            key: key.to_string(),
            url: Some(format!("file://{}", dest.display())),
        })
    }

    async fn check_credentials(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::Permanent(format!("store root {}: {e}", self.root.display())))?;
        let meta = tokio::fs::metadata(&self.root)
            .await
            .map_err(|e| StoreError::Permanent(e.to_string()))?;
        if meta.permissions().readonly() {
            return Err(StoreError::Permanent(format!(
                "store root {} is read-only",
                self.root.display()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "fs"
    }
}
