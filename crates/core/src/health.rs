// crates/core/src/health.rs
//! Process-wide readiness state and the self-check that feeds it.
//!
//! [`HealthState`] starts not-ready. The startup sequence and the periodic
//! self-check task are its only writers; the health endpoint only reads it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SelfCheckError;
use crate::scratch::ScratchManager;
use crate::store::{ObjectStore, StoreError};

#[derive(Debug, Clone, Copy)]
struct CheckStamp {
    at: Instant,
    wall: DateTime<Utc>,
}

/// Cached readiness, cheap to read from request handlers.
#[derive(Debug)]
pub struct HealthState {
    ready: AtomicBool,
    last_check: RwLock<Option<CheckStamp>>,
    staleness: Duration,
}

/// Point-in-time health verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub healthy: bool,
    pub ready: bool,
    pub last_self_check: Option<DateTime<Utc>>,
    /// Why the process is unhealthy, if it is.
    pub reason: Option<String>,
}

impl HealthState {
    /// Not ready, no self-check recorded.
    pub fn new(staleness: Duration) -> Self {
        Self {
            ready: AtomicBool::new(false),
            last_check: RwLock::new(None),
            staleness,
        }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Record a successful self-check at the current instant.
    pub fn record_self_check(&self) {
        let stamp = CheckStamp {
            at: Instant::now(),
            wall: Utc::now(),
        };
        match self.last_check.write() {
            Ok(mut guard) => *guard = Some(stamp),
            Err(e) => tracing::error!("RwLock poisoned writing self-check stamp: {e}"),
        }
    }

    pub fn report(&self) -> HealthReport {
        let ready = self.is_ready();
        let stamp = match self.last_check.read() {
            Ok(guard) => *guard,
            Err(e) => {
                tracing::error!("RwLock poisoned reading self-check stamp: {e}");
                None
            }
        };

        let reason = match stamp {
            _ if !ready => Some("not ready".to_string()),
            None => Some("no self-check recorded".to_string()),
            Some(s) if s.at.elapsed() > self.staleness => Some(format!(
                "last self-check {}s ago exceeds {}s staleness bound",
                s.at.elapsed().as_secs(),
                self.staleness.as_secs()
            )),
            Some(_) => None,
        };

        HealthReport {
            healthy: reason.is_none(),
            ready,
            last_self_check: stamp.map(|s| s.wall),
            reason,
        }
    }
}

/// Scratch root writable and object-store credentials usable, both within
/// `limit`. A check that runs out of time counts as a transient store error.
pub async fn run_self_check(
    scratch: &ScratchManager,
    store: &dyn ObjectStore,
    limit: Duration,
) -> Result<(), SelfCheckError> {
    let check = async {
        scratch.check_writable().await?;
        store.check_credentials().await?;
        Ok::<(), SelfCheckError>(())
    };
    match tokio::time::timeout(limit, check).await {
        Ok(result) => result,
        Err(_) => Err(SelfCheckError::Store(StoreError::Transient(format!(
            "self-check against {} timed out after {:.1}s",
            store.name(),
            limit.as_secs_f64()
        )))),
    }
}

/// Re-run the self-check every `interval` until `cancel` fires, including
/// mid-check. Failures leave the last stamp untouched so the staleness
/// bound trips.
pub async fn self_check_loop(
    health: Arc<HealthState>,
    scratch: ScratchManager,
    store: Arc<dyn ObjectStore>,
    interval: Duration,
    limit: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = run_self_check(&scratch, store.as_ref(), limit) => result,
        };
        match result {
            Ok(()) => {
                health.record_self_check();
                tracing::debug!("Self-check passed");
            }
            Err(e) => tracing::warn!(error = %e, "Self-check failed"),
        }
    }
    tracing::debug!("Self-check loop stopped");
}
