// crates/core/src/retry.rs
//! Bounded exponential-backoff upload loop.

use std::path::Path;
use std::time::Duration;

use metrics::counter;

use crate::store::{ObjectRef, ObjectStore, StoreError};

/// Upload retry schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; only transient errors are retried.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound on a single upload attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Result of [`upload_with_retry`] together with how many attempts it took.
#[derive(Debug)]
pub struct UploadOutcome {
    pub result: Result<ObjectRef, StoreError>,
    pub attempts: u32,
}

/// Upload `local` under `key`, retrying transient failures per `policy`.
pub async fn upload_with_retry(
    store: &dyn ObjectStore,
    local: &Path,
    key: &str,
    policy: &RetryPolicy,
) -> UploadOutcome {
    let mut attempts = 0;
    loop {
        attempts += 1;
        counter!("upload_attempts_total", "store" => store.name().to_string()).increment(1);

        let result = match tokio::time::timeout(policy.attempt_timeout, store.upload(local, key)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Transient(format!(
                "upload attempt timed out after {}ms",
                policy.attempt_timeout.as_millis()
            ))),
        };

        match result {
            Ok(obj) => return UploadOutcome { result: Ok(obj), attempts },
            Err(err) if err.is_transient() && attempts <= policy.max_retries => {
                let delay = policy.delay_for(attempts);
                tracing::warn!(
                    key,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Upload failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                tracing::warn!(key, attempts, error = %err, "Upload failed, giving up");
                return UploadOutcome { result: Err(err), attempts };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with `error` for the first `failures` calls, then succeeds.
    struct FlakyStore {
        failures: u32,
        error: StoreError,
        calls: AtomicU32,
        hang: Option<Duration>,
    }

    impl FlakyStore {
        fn new(failures: u32, error: StoreError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
                hang: None,
            }
        }
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn upload(&self, _local: &Path, key: &str) -> Result<ObjectRef, StoreError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(hang) = self.hang {
                tokio::time::sleep(hang).await;
            }
            if n <= self.failures {
                return Err(self.error.clone());
            }
            Ok(ObjectRef {
                key: key.to_string(),
                url: None,
            })
        }

        async fn check_credentials(&self) -> Result<(), StoreError> {
            Ok(())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            attempt_timeout: Duration::from_secs(1),
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
        assert_eq!(p.delay_for(4), Duration::from_millis(800));
        assert_eq!(p.delay_for(5), Duration::from_millis(1000));
        assert_eq!(p.delay_for(64), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let store = FlakyStore::new(2, StoreError::Transient("503".into()));
        let out = upload_with_retry(&store, Path::new("a"), "k", &policy(3)).await;
        assert!(out.result.is_ok());
        assert_eq!(out.attempts, 3);
    }

    #[tokio::test]
    async fn test_transient_exhausts_retries() {
        let store = FlakyStore::new(u32::MAX, StoreError::Transient("503".into()));
        let out = upload_with_retry(&store, Path::new("a"), "k", &policy(3)).await;
        assert!(matches!(out.result, Err(StoreError::Transient(_))));
        assert_eq!(out.attempts, 4);
        assert_eq!(store.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_zero_retries_means_one_attempt() {
        let store = FlakyStore::new(u32::MAX, StoreError::Transient("503".into()));
        let out = upload_with_retry(&store, Path::new("a"), "k", &policy(0)).await;
        assert_eq!(out.attempts, 1);
    }

    #[tokio::test]
    async fn test_permanent_is_not_retried() {
        let store = FlakyStore::new(u32::MAX, StoreError::Permanent("403".into()));
        let out = upload_with_retry(&store, Path::new("a"), "k", &policy(5)).await;
        assert!(matches!(out.result, Err(StoreError::Permanent(_))));
        assert_eq!(out.attempts, 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_transient() {
        let mut store = FlakyStore::new(0, StoreError::Transient("unused".into()));
        store.hang = Some(Duration::from_secs(10));
        let mut p = policy(1);
        p.attempt_timeout = Duration::from_millis(20);

        let out = upload_with_retry(&store, Path::new("a"), "k", &p).await;
        let Err(StoreError::Transient(detail)) = out.result else {
            panic!("expected transient timeout");
        };
        assert!(detail.contains("timed out"));
        assert_eq!(out.attempts, 2);
    }
}
