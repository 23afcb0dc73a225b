// crates/core/src/store/mod.rs
//! Object store client abstraction.
//!
//! Provides:
//! - `ObjectStore` - upload one local file under a key
//! - `StoreError` - Transient (retry-eligible) vs Permanent classification
//! - `GcsStore` - Google Cloud Storage JSON API backend
//! - `FsStore` - local directory backend for development

mod fs;
mod gcs;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fs::FsStore;
pub use gcs::{GcsStore, TokenSource, DEFAULT_GCS_ENDPOINT, DEFAULT_REQUEST_TIMEOUT, METADATA_TOKEN_URL};

/// Where an uploaded artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub key: String,
    /// Public or backend-specific URL, when the backend has one.
    pub url: Option<String>,
}

/// Upload failure, classified by whether retrying can help.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Network, timeout, throttling or server-side failure.
    #[error("transient: {0}")]
    Transient(String),

    /// Auth, permission, invalid key or unreadable source file.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = format!("HTTP {status}: {}", truncate(body, 200));
        match status {
            408 | 429 | 500..=599 => Self::Transient(detail),
            _ => Self::Permanent(detail),
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), &err.to_string());
        }
        if err.is_builder() || err.is_decode() {
            Self::Permanent(err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Trait for remote stores that persist generated artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `local` under `key`.
    async fn upload(&self, local: &Path, key: &str) -> Result<ObjectRef, StoreError>;

    /// Verify credentials are available and the target is reachable.
    async fn check_credentials(&self) -> Result<(), StoreError>;

    /// Backend name for logging (e.g. "gcs", "fs").
    fn name(&self) -> &str;
}

/// Reject keys no backend can store.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|seg| seg == ".." || seg.is_empty()) {
        return Err(StoreError::Permanent(format!("invalid object key {key:?}")));
    }
    Ok(())
}

/// MIME type for an artifact, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("txt") | Some("md") => "text/plain; charset=utf-8",
        Some("json") => "application/json",
        Some("rss") | Some("xml") => "application/rss+xml",
        _ => "application/octet-stream",
    }
}
