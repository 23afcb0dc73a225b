// crates/core/src/store/gcs.rs
//! Google Cloud Storage backend (JSON API, simple media upload).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{content_type_for, validate_key, ObjectRef, ObjectStore, StoreError};

pub const DEFAULT_GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// Instance metadata endpoint serving the ambient service-account token.
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh cached tokens this long before they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Per-request bound unless overridden with [`GcsStore::with_request_timeout`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

pub struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Where bearer tokens come from.
pub enum TokenSource {
    /// A fixed token, e.g. from `GCS_ACCESS_TOKEN`.
    Static(String),
    /// The instance metadata server, cached until shortly before expiry.
    Metadata {
        url: String,
        cache: Mutex<Option<CachedToken>>,
    },
}

impl TokenSource {
    pub fn metadata(url: impl Into<String>) -> Self {
        Self::Metadata {
            url: url.into(),
            cache: Mutex::new(None),
        }
    }

    async fn token(&self, client: &reqwest::Client, timeout: Duration) -> Result<String, StoreError> {
        match self {
            Self::Static(token) if token.is_empty() => {
                Err(StoreError::Permanent("empty access token".into()))
            }
            Self::Static(token) => Ok(token.clone()),
            Self::Metadata { url, cache } => {
                let mut cache = cache.lock().await;
                if let Some(cached) = cache.as_ref() {
                    if Instant::now() < cached.expires_at {
                        return Ok(cached.value.clone());
                    }
                }

                let resp = client
                    .get(url)
                    .header("Metadata-Flavor", "Google")
                    .timeout(timeout)
                    .send()
                    .await
                    .map_err(|e| StoreError::from_reqwest(&e))?;
                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(StoreError::from_status(status.as_u16(), &body));
                }
                let token: MetadataToken = resp
                    .json()
                    .await
                    .map_err(|e| StoreError::Permanent(format!("bad metadata token: {e}")))?;

                let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
                *cache = Some(CachedToken {
                    value: token.access_token.clone(),
                    expires_at: Instant::now() + lifetime,
                });
                tracing::debug!(expires_in = token.expires_in, "Fetched access token from metadata server");
                Ok(token.access_token)
            }
        }
    }
}

/// Uploads artifacts to one GCS bucket.
pub struct GcsStore {
    client: reqwest::Client,
    bucket: String,
    endpoint: String,
    tokens: TokenSource,
    request_timeout: Duration,
}

impl GcsStore {
    pub fn new(bucket: impl Into<String>, tokens: TokenSource) -> Self {
        Self {
            client: reqwest::Client::new(),
            bucket: bucket.into(),
            endpoint: DEFAULT_GCS_ENDPOINT.to_string(),
            tokens,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound every HTTP exchange, token fetches included. An elapsed
    /// request surfaces as [`StoreError::Transient`].
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Point at an alternate API endpoint (emulators, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn upload(&self, local: &Path, key: &str) -> Result<ObjectRef, StoreError> {
        validate_key(key)?;
        let body = tokio::fs::read(local)
            .await
            .map_err(|e| StoreError::Permanent(format!("read {}: {e}", local.display())))?;
        let size = body.len();
        let token = self.tokens.token(&self.client, self.request_timeout).await?;

        let url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.endpoint,
            urlencoding::encode(&self.bucket),
            urlencoding::encode(key),
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type_for(local))
            .body(body)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| StoreError::from_reqwest(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::from_status(status.as_u16(), &body));
        }

        tracing::info!(bucket = %self.bucket, key, size, "Uploaded artifact to GCS");
        Ok(ObjectRef {
            key: key.to_string(),
            url: Some(self.public_url(key)),
        })
    }

    async fn check_credentials(&self) -> Result<(), StoreError> {
        let token = self.tokens.token(&self.client, self.request_timeout).await?;
        let url = format!(
            "{}/storage/v1/b/{}",
            self.endpoint,
            urlencoding::encode(&self.bucket)
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| StoreError::from_reqwest(&e))?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(StoreError::from_status(status.as_u16(), &body))
        }
    }

    fn name(&self) -> &str {
        "gcs"
    }
}
