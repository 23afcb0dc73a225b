// crates/core/src/config.rs
//! Service configuration, loaded from environment variables.
//!
//! Every setting has a default except the GCS bucket when the `gcs` backend
//! is selected. Values that fail to parse abort startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::feed::{FeedConfig, DEFAULT_FEED_KEY};
use crate::generator::{CommandGenerator, Generator, TranscriptGenerator};
use crate::job::{object_key, JobId};
use crate::orchestrator::OrchestratorConfig;
use crate::retry::RetryPolicy;
use crate::store::{
    validate_key, FsStore, GcsStore, ObjectStore, TokenSource, DEFAULT_GCS_ENDPOINT, METADATA_TOKEN_URL,
};

pub const DEFAULT_PORT: u16 = 8080;

/// Which object store backend to upload to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Gcs {
        bucket: String,
        /// Static bearer token; falls back to the metadata server when unset.
        access_token: Option<String>,
        endpoint: String,
        metadata_url: String,
    },
    Fs {
        root: PathBuf,
    },
}

impl StoreConfig {
    /// `request_timeout` bounds each HTTP exchange of remote backends.
    pub fn build(&self, request_timeout: Duration) -> Arc<dyn ObjectStore> {
        match self {
            Self::Gcs {
                bucket,
                access_token,
                endpoint,
                metadata_url,
            } => {
                let tokens = match access_token {
                    Some(token) => TokenSource::Static(token.clone()),
                    None => TokenSource::metadata(metadata_url.clone()),
                };
                Arc::new(
                    GcsStore::new(bucket.clone(), tokens)
                        .with_endpoint(endpoint.clone())
                        .with_request_timeout(request_timeout),
                )
            }
            Self::Fs { root } => Arc::new(FsStore::new(root.clone())),
        }
    }
}

/// How artifacts get generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// External program (whitespace-separated command line).
    pub command: Option<String>,
    /// Show title for the built-in transcript generator.
    pub show_title: String,
}

impl GeneratorConfig {
    pub fn build(&self) -> Arc<dyn Generator> {
        match self.command.as_deref().and_then(CommandGenerator::from_command_line) {
            Some(cmd) => Arc::new(cmd),
            None => Arc::new(TranscriptGenerator::new(self.show_title.clone())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Full configuration surface of the service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    pub scratch_root: PathBuf,
    pub max_concurrent_jobs: usize,
    pub max_body_bytes: usize,
    pub generation_timeout: Duration,
    pub retry: RetryPolicy,
    pub job_retention: Duration,
    pub health_staleness: Duration,
    pub self_check_interval: Duration,
    pub shutdown_grace: Duration,
    pub object_key_prefix: String,
    pub store: StoreConfig,
    pub generator: GeneratorConfig,
    pub feed: FeedConfig,
    pub publish_feed: bool,
    pub log_format: LogFormat,
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse::<T>().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn secs(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse(key, default).map(Duration::from_secs)
    }

    fn millis(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse(key, default).map(Duration::from_millis)
    }
}

/// Keys built from `value` must pass the same checks the stores apply.
fn require_valid_key(key: &'static str, value: &str, candidate: &str) -> Result<(), ConfigError> {
    validate_key(candidate).map_err(|e| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn require_positive(key: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(())
}

impl ServiceConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let max_concurrent_jobs: usize = env.parse("MAX_CONCURRENT_JOBS", 4)?;
        require_positive("MAX_CONCURRENT_JOBS", max_concurrent_jobs as u64)?;
        let max_body_bytes: usize = env.parse("MAX_BODY_BYTES", 64 * 1024)?;
        require_positive("MAX_BODY_BYTES", max_body_bytes as u64)?;

        let health_staleness = env.secs("HEALTH_STALENESS_SECS", 120)?;
        require_positive("HEALTH_STALENESS_SECS", health_staleness.as_secs())?;
        let default_interval = (health_staleness.as_secs() / 4).max(1);
        let self_check_interval = env.secs("SELF_CHECK_INTERVAL_SECS", default_interval)?;
        require_positive("SELF_CHECK_INTERVAL_SECS", self_check_interval.as_secs())?;
        if self_check_interval >= health_staleness {
            return Err(ConfigError::Invalid {
                key: "SELF_CHECK_INTERVAL_SECS",
                value: self_check_interval.as_secs().to_string(),
                reason: "must be shorter than HEALTH_STALENESS_SECS".into(),
            });
        }

        let retry = RetryPolicy {
            max_retries: env.parse("UPLOAD_MAX_RETRIES", 3)?,
            base_delay: env.millis("UPLOAD_BACKOFF_BASE_MS", 500)?,
            max_delay: env.millis("UPLOAD_BACKOFF_MAX_MS", 30_000)?,
            attempt_timeout: env.secs("UPLOAD_TIMEOUT_SECS", 60)?,
        };
        require_positive("UPLOAD_TIMEOUT_SECS", retry.attempt_timeout.as_secs())?;

        let generation_timeout = env.secs("GENERATION_TIMEOUT_SECS", 300)?;
        require_positive("GENERATION_TIMEOUT_SECS", generation_timeout.as_secs())?;

        let bucket = env.get("GCS_BUCKET_NAME");
        let backend = env
            .get("STORE_BACKEND")
            .unwrap_or_else(|| (if bucket.is_some() { "gcs" } else { "fs" }).to_string());
        let store = match backend.to_ascii_lowercase().as_str() {
            "gcs" => StoreConfig::Gcs {
                bucket: bucket.ok_or(ConfigError::Missing { key: "GCS_BUCKET_NAME" })?,
                access_token: env.get("GCS_ACCESS_TOKEN"),
                endpoint: env.get("GCS_ENDPOINT").unwrap_or_else(|| DEFAULT_GCS_ENDPOINT.to_string()),
                metadata_url: env
                    .get("GCS_METADATA_TOKEN_URL")
                    .unwrap_or_else(|| METADATA_TOKEN_URL.to_string()),
            },
            "fs" => StoreConfig::Fs {
                root: env
                    .get("FS_STORE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| std::env::temp_dir().join("episode-forge-store")),
            },
            other => {
                return Err(ConfigError::Invalid {
                    key: "STORE_BACKEND",
                    value: other.to_string(),
                    reason: "expected 'gcs' or 'fs'".into(),
                })
            }
        };

        let object_key_prefix = env.get("OBJECT_KEY_PREFIX").unwrap_or_else(|| "episodes".to_string());
        require_valid_key(
            "OBJECT_KEY_PREFIX",
            &object_key_prefix,
            &object_key(&object_key_prefix, &JobId::from("0")),
        )?;

        let show_title = env
            .get("PODCAST_TITLE")
            .unwrap_or_else(|| "The Neural Narrative".to_string());
        let feed_defaults = FeedConfig::default();
        let feed = FeedConfig {
            title: show_title.clone(),
            description: env.get("PODCAST_DESCRIPTION").unwrap_or(feed_defaults.description),
            author: env.get("PODCAST_AUTHOR").unwrap_or(feed_defaults.author),
            email: env.get("PODCAST_EMAIL").unwrap_or(feed_defaults.email),
            base_url: env.get("PODCAST_BASE_URL").unwrap_or(feed_defaults.base_url),
            key: env.get("RSS_FEED_PATH").unwrap_or_else(|| DEFAULT_FEED_KEY.to_string()),
            enclosure_type: env.get("FEED_ENCLOSURE_TYPE").unwrap_or(feed_defaults.enclosure_type),
        };
        require_valid_key("RSS_FEED_PATH", &feed.key, &feed.key)?;

        let log_format = match env.get("LOG_FORMAT").as_deref() {
            None | Some("compact") | Some("text") => LogFormat::Compact,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "LOG_FORMAT",
                    value: other.to_string(),
                    reason: "expected 'json' or 'compact'".into(),
                })
            }
        };

        Ok(Self {
            port: env.parse("PORT", DEFAULT_PORT)?,
            scratch_root: env
                .get("SCRATCH_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("episode-forge")),
            max_concurrent_jobs,
            max_body_bytes,
            generation_timeout,
            retry,
            job_retention: env.secs("JOB_RETENTION_SECS", 3600)?,
            health_staleness,
            self_check_interval,
            shutdown_grace: env.secs("SHUTDOWN_GRACE_SECS", 30)?,
            object_key_prefix,
            store,
            generator: GeneratorConfig {
                command: env.get("GENERATOR_COMMAND"),
                show_title,
            },
            feed,
            publish_feed: env.parse("PUBLISH_FEED", true)?,
            log_format,
        })
    }

    /// The subset the job orchestrator needs.
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrent_jobs: self.max_concurrent_jobs,
            generation_timeout: self.generation_timeout,
            retry: self.retry.clone(),
            job_retention: self.job_retention,
            object_key_prefix: self.object_key_prefix.clone(),
            feed: self.feed.clone(),
            publish_feed: self.publish_feed,
        }
    }

    /// Bound for one self-check: never longer than the check interval or a
    /// single upload attempt.
    pub fn self_check_timeout(&self) -> Duration {
        self.self_check_interval.min(self.retry.attempt_timeout)
    }
}
