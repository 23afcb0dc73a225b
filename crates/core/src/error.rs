// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the scratch directory manager.
#[derive(Debug, Error)]
pub enum ScratchError {
    #[error("Scratch directory already allocated: {path}")]
    AlreadyAllocated { path: PathBuf },

    #[error("Scratch root is not writable: {path}: {source}")]
    NotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error on scratch path {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScratchError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::AlreadyExists => Self::AlreadyAllocated { path },
            std::io::ErrorKind::PermissionDenied => Self::NotWritable { path, source },
            _ => Self::Io { path, source },
        }
    }
}

/// Errors raised while loading the service configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting {key}")]
    Missing { key: &'static str },

    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Errors returned when a job cannot be admitted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Too many jobs in flight (limit {limit})")]
    Overloaded { limit: usize },

    #[error("Service is shutting down")]
    ShuttingDown,
}

/// Failed startup or periodic self-check.
#[derive(Debug, Error)]
pub enum SelfCheckError {
    #[error("Scratch check failed: {0}")]
    Scratch(#[from] ScratchError),

    #[error("Object store check failed: {0}")]
    Store(#[from] crate::store::StoreError),
}
