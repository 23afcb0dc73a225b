// crates/core/src/orchestrator.rs
//! Job orchestrator: admission, per-job pipeline, retention and shutdown.
//!
//! Each admitted job runs as its own tracked task:
//! scratch allocation → generation → upload (with retry) → scratch release.
//! The scratch directory is always released before the terminal status is
//! written, so a terminal job never has scratch space on disk. When feed
//! publishing is on, a Done job then re-uploads the RSS feed.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::SubmitError;
use crate::feed::{render_feed, FeedConfig};
use crate::generator::{verify_artifact, GenerationRequest, Generator};
use crate::job::{object_key, Job, JobFailure, JobId, JobParams, JobSnapshot};
use crate::retry::{upload_with_retry, RetryPolicy};
use crate::scratch::ScratchManager;
use crate::store::{ObjectRef, ObjectStore};

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent_jobs: usize,
    pub generation_timeout: Duration,
    pub retry: RetryPolicy,
    /// How long terminal jobs stay queryable.
    pub job_retention: Duration,
    pub object_key_prefix: String,
    pub feed: FeedConfig,
    /// Re-upload the feed after every Done job.
    pub publish_feed: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            generation_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            job_retention: Duration::from_secs(3600),
            object_key_prefix: "episodes".to_string(),
            feed: FeedConfig::default(),
            publish_feed: false,
        }
    }
}

/// One row of the job table. The mutex gives each job a single writer.
struct JobEntry {
    job: Mutex<Job>,
}

impl JobEntry {
    fn lock(&self) -> MutexGuard<'_, Job> {
        self.job.lock().unwrap_or_else(|e| {
            tracing::error!("Mutex poisoned on job entry: {e}");
            e.into_inner()
        })
    }
}

struct PipelineOutcome {
    result: Result<ObjectRef, JobFailure>,
    attempts: u32,
}

impl PipelineOutcome {
    fn failed(failure: JobFailure) -> Self {
        Self {
            result: Err(failure),
            attempts: 0,
        }
    }
}

/// Owns every job's lifecycle and bounds how many run at once.
pub struct JobOrchestrator {
    config: OrchestratorConfig,
    jobs: RwLock<HashMap<JobId, Arc<JobEntry>>>,
    permits: Arc<Semaphore>,
    scratch: ScratchManager,
    generator: Arc<dyn Generator>,
    store: Arc<dyn ObjectStore>,
    tracker: TaskTracker,
    /// Whether new jobs are admitted. Held across admit-and-spawn.
    accepting: Mutex<bool>,
    force_stop: CancellationToken,
    feed_publish: tokio::sync::Mutex<()>,
}

impl JobOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        scratch: ScratchManager,
        generator: Arc<dyn Generator>,
        store: Arc<dyn ObjectStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            config,
            jobs: RwLock::new(HashMap::new()),
            scratch,
            generator,
            store,
            tracker: TaskTracker::new(),
            accepting: Mutex::new(true),
            force_stop: CancellationToken::new(),
            feed_publish: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Admit a job and start its pipeline in the background.
    ///
    /// Returns immediately with the Pending snapshot; the caller polls
    /// [`get`](Self::get) for the outcome.
    pub fn submit(self: &Arc<Self>, params: JobParams) -> Result<JobSnapshot, SubmitError> {
        // Released only after the spawn; `shutdown` closes the tracker under
        // the same lock, so every admitted job is drained or interrupted.
        let accepting = self.admission();
        if !*accepting {
            counter!("jobs_rejected_total", "reason" => "shutting_down").increment(1);
            return Err(SubmitError::ShuttingDown);
        }
        let permit = Arc::clone(&self.permits).try_acquire_owned().map_err(|_| {
            counter!("jobs_rejected_total", "reason" => "overloaded").increment(1);
            tracing::warn!(limit = self.config.max_concurrent_jobs, "Rejecting job: at capacity");
            SubmitError::Overloaded {
                limit: self.config.max_concurrent_jobs,
            }
        })?;

        let id = JobId::generate();
        let job = Job::new(id.clone(), params);
        let snapshot = job.snapshot();
        let entry = Arc::new(JobEntry {
            job: Mutex::new(job),
        });
        match self.jobs.write() {
            Ok(mut jobs) => {
                jobs.insert(id.clone(), Arc::clone(&entry));
            }
            Err(e) => {
                tracing::error!("RwLock poisoned writing jobs table: {e}");
                e.into_inner().insert(id.clone(), Arc::clone(&entry));
            }
        }

        counter!("jobs_submitted_total").increment(1);
        gauge!("jobs_in_flight").set(self.in_flight() as f64);
        tracing::info!(job_id = %id, "Job accepted");

        let this = Arc::clone(self);
        self.tracker.spawn(async move {
            this.run(entry, permit).await;
        });
        drop(accepting);
        Ok(snapshot)
    }

    /// Snapshot of a job, or `None` if unknown or past retention.
    pub fn get(&self, id: &JobId) -> Option<JobSnapshot> {
        let entry = self.read_table(|jobs| jobs.get(id).cloned())?;
        let job = entry.lock();
        if job.is_expired(self.config.job_retention, tokio::time::Instant::now()) {
            return None;
        }
        Some(job.snapshot())
    }

    /// All retained jobs, newest first.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let entries: Vec<Arc<JobEntry>> = self.read_table(|jobs| jobs.values().cloned().collect());
        let now = tokio::time::Instant::now();
        let mut out: Vec<JobSnapshot> = entries
            .iter()
            .filter_map(|entry| {
                let job = entry.lock();
                (!job.is_expired(self.config.job_retention, now)).then(|| job.snapshot())
            })
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Jobs currently holding an admission permit.
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent_jobs - self.permits.available_permits()
    }

    pub fn is_accepting(&self) -> bool {
        *self.admission()
    }

    /// RSS document over the retained, completed episodes.
    pub fn feed(&self) -> String {
        render_feed(&self.config.feed, &self.list(), Utc::now())
    }

    /// Drop terminal jobs older than the retention window. Returns how many
    /// were evicted.
    pub fn evict_expired(&self) -> usize {
        let now = tokio::time::Instant::now();
        let retention = self.config.job_retention;
        let mut jobs = match self.jobs.write() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("RwLock poisoned writing jobs table: {e}");
                e.into_inner()
            }
        };
        let before = jobs.len();
        jobs.retain(|_, entry| !entry.lock().is_expired(retention, now));
        let evicted = before - jobs.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = jobs.len(), "Evicted expired jobs");
        }
        evicted
    }

    /// Periodically evict expired jobs until `cancel` fires.
    pub async fn run_retention_sweeper(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.evict_expired();
                }
            }
        }
    }

    /// Stop admitting, wait up to `grace` for in-flight jobs, then interrupt
    /// the rest. Returns how many jobs were interrupted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        {
            let mut accepting = self.admission();
            *accepting = false;
            self.tracker.close();
        }
        tracing::info!(
            in_flight = self.tracker.len(),
            grace_secs = grace.as_secs_f64(),
            "Draining in-flight jobs"
        );

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            tracing::info!("All jobs drained");
            return 0;
        }

        let remaining = self.tracker.len();
        tracing::warn!(remaining, "Grace period elapsed, interrupting jobs");
        self.force_stop.cancel();
        self.tracker.wait().await;
        remaining
    }

    fn admission(&self) -> MutexGuard<'_, bool> {
        self.accepting.lock().unwrap_or_else(|e| {
            tracing::error!("Mutex poisoned on admission flag: {e}");
            e.into_inner()
        })
    }

    fn read_table<R>(&self, f: impl FnOnce(&HashMap<JobId, Arc<JobEntry>>) -> R) -> R {
        match self.jobs.read() {
            Ok(jobs) => f(&jobs),
            Err(e) => {
                tracing::error!("RwLock poisoned reading jobs table: {e}");
                f(&e.into_inner())
            }
        }
    }

    async fn run(self: Arc<Self>, entry: Arc<JobEntry>, permit: OwnedSemaphorePermit) {
        let started = tokio::time::Instant::now();
        let (id, params) = {
            let mut job = entry.lock();
            if let Err(e) = job.start() {
                tracing::error!(job_id = %job.id(), error = %e, "Job could not start");
                return;
            }
            (job.id().clone(), job.params().clone())
        };
        tracing::info!(job_id = %id, "Job running");

        let mut scratch = match self.scratch.allocate(&id).await {
            Ok(scratch) => scratch,
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Scratch allocation failed");
                self.finish(&entry, PipelineOutcome::failed(JobFailure::Scratch(e.to_string())), started);
                return;
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = self.force_stop.cancelled() => PipelineOutcome::failed(JobFailure::ShutdownInterrupted),
            outcome = self.pipeline(&entry, &id, params, scratch.path()) => outcome,
        };

        if let Err(e) = scratch.release().await {
            tracing::error!(job_id = %id, error = %e, "Failed to release scratch directory");
        }
        drop(scratch);

        let done = self.finish(&entry, outcome, started);
        drop(permit);

        if done && self.config.publish_feed {
            tokio::select! {
                biased;
                _ = self.force_stop.cancelled() => {
                    tracing::warn!(job_id = %id, "Feed publish interrupted by shutdown");
                }
                _ = self.publish_feed() => {}
            }
        }
    }

    async fn pipeline(&self, entry: &JobEntry, id: &JobId, params: JobParams, dir: &Path) -> PipelineOutcome {
        let request = GenerationRequest {
            job_id: id.clone(),
            params,
            scratch_dir: dir.to_path_buf(),
        };
        let timeout = self.config.generation_timeout;
        let produced = match tokio::time::timeout(timeout, self.generator.generate(request)).await {
            Err(_) => {
                tracing::warn!(job_id = %id, timeout_secs = timeout.as_secs(), "Generation timed out");
                return PipelineOutcome::failed(JobFailure::GenerationTimeout(timeout));
            }
            Ok(Err(e)) => {
                tracing::warn!(job_id = %id, generator = self.generator.name(), error = %e, "Generation failed");
                return PipelineOutcome::failed(JobFailure::Generation(e.0));
            }
            Ok(Ok(path)) => path,
        };
        let artifact = match verify_artifact(dir, &produced).await {
            Ok(path) => path,
            Err(e) => return PipelineOutcome::failed(JobFailure::Generation(e.0)),
        };

        if let Err(e) = entry.lock().begin_upload() {
            tracing::error!(job_id = %id, error = %e, "Unexpected state before upload");
            return PipelineOutcome::failed(JobFailure::Internal(e.to_string()));
        }

        let key = object_key(&self.config.object_key_prefix, id);
        tracing::info!(job_id = %id, key = %key, store = self.store.name(), "Uploading artifact");
        let upload = upload_with_retry(self.store.as_ref(), &artifact, &key, &self.config.retry).await;
        PipelineOutcome {
            result: upload.result.map_err(|e| JobFailure::UploadFailed(e.to_string())),
            attempts: upload.attempts,
        }
    }

    /// Record the terminal state. Returns `true` if the job is now Done.
    fn finish(&self, entry: &JobEntry, outcome: PipelineOutcome, started: tokio::time::Instant) -> bool {
        let mut job = entry.lock();
        let id = job.id().clone();
        let (label, result) = match outcome.result {
            Ok(obj) => ("done", job.complete(obj, outcome.attempts)),
            Err(failure) => {
                let label = failure.kind();
                tracing::warn!(job_id = %id, error = %failure, "Job failed");
                (label, job.fail(failure, outcome.attempts))
            }
        };
        drop(job);

        if let Err(e) = result {
            tracing::error!(job_id = %id, error = %e, "Could not record terminal state");
            return false;
        }
        let elapsed = started.elapsed();
        counter!("jobs_finished_total", "outcome" => label).increment(1);
        histogram!("job_duration_seconds").record(elapsed.as_secs_f64());
        // The permit is still held here; it is released when `run` returns.
        gauge!("jobs_in_flight").set(self.in_flight().saturating_sub(1) as f64);
        tracing::info!(job_id = %id, outcome = label, duration_secs = elapsed.as_secs_f64(), "Job finished");
        label == "done"
    }

    /// Stage the current feed in the scratch root and upload it under the
    /// feed key. Publishes are serialized so an older feed never lands last.
    async fn publish_feed(&self) {
        let _serial = self.feed_publish.lock().await;
        let staged = self
            .scratch
            .root()
            .join(format!(".feed-{}.rss", uuid::Uuid::new_v4().simple()));
        if let Err(e) = tokio::fs::write(&staged, self.feed()).await {
            tracing::warn!(path = %staged.display(), error = %e, "Could not stage feed");
            return;
        }

        let key = &self.config.feed.key;
        let upload = upload_with_retry(self.store.as_ref(), &staged, key, &self.config.retry).await;
        match upload.result {
            Ok(obj) => tracing::info!(key = %obj.key, attempts = upload.attempts, "Feed published"),
            Err(e) => tracing::warn!(key = %key, error = %e, "Feed publish failed"),
        }

        if let Err(e) = tokio::fs::remove_file(&staged).await {
            tracing::debug!(path = %staged.display(), error = %e, "Could not remove staged feed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::GenerationError;
    use crate::job::JobStatus;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Writes a fixed artifact, optionally waiting on a gate first.
    struct FixedGenerator {
        gate: Option<Arc<Semaphore>>,
        started: AtomicU32,
        fail_with: Option<String>,
        delay: Option<Duration>,
    }

    impl FixedGenerator {
        fn ok() -> Self {
            Self {
                gate: None,
                started: AtomicU32::new(0),
                fail_with: None,
                delay: None,
            }
        }
    }

    #[async_trait]
    impl Generator for FixedGenerator {
        async fn generate(&self, request: GenerationRequest) -> Result<PathBuf, GenerationError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            std::fs::write(request.scratch_dir.join("partial.tmp"), b"..").unwrap();
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(detail) = &self.fail_with {
                return Err(GenerationError::new(detail.clone()));
            }
            let path = request.scratch_dir.join("episode.mp3");
            std::fs::write(&path, b"ID3").unwrap();
            Ok(path)
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    /// Fails the first `failures` uploads with `error`.
    struct MockStore {
        failures: u32,
        error: StoreError,
        calls: AtomicU32,
    }

    impl MockStore {
        fn ok() -> Self {
            Self::failing(0, StoreError::Transient("unused".into()))
        }

        fn failing(failures: u32, error: StoreError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for MockStore {
        async fn upload(&self, local: &Path, key: &str) -> Result<ObjectRef, StoreError> {
            assert!(local.is_file(), "artifact must exist during upload");
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                return Err(self.error.clone());
            }
            Ok(ObjectRef {
                key: key.to_string(),
                url: Some(format!("mem://{key}")),
            })
        }

        async fn check_credentials(&self) -> Result<(), StoreError> {
            Ok(())
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn config(max: usize) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrent_jobs: max,
            generation_timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                attempt_timeout: Duration::from_secs(5),
            },
            job_retention: Duration::from_secs(3600),
            object_key_prefix: "episodes".into(),
            feed: FeedConfig::default(),
            publish_feed: false,
        }
    }

    async fn setup(
        cfg: OrchestratorConfig,
        generator: Arc<dyn Generator>,
        store: Arc<dyn ObjectStore>,
    ) -> (tempfile::TempDir, ScratchManager, Arc<JobOrchestrator>) {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchManager::new(dir.path().join("scratch"));
        scratch.init().await.unwrap();
        let orch = JobOrchestrator::new(cfg, scratch.clone(), generator, store);
        (dir, scratch, orch)
    }

    fn topic() -> JobParams {
        let mut p = JobParams::new();
        p.insert("topic".into(), serde_json::json!("x"));
        p
    }

    async fn wait_terminal(orch: &JobOrchestrator, id: &JobId) -> JobSnapshot {
        for _ in 0..500 {
            if let Some(snap) = orch.get(id) {
                if snap.status.is_terminal() {
                    return snap;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached a terminal state");
    }

    async fn wait_started(gen: &FixedGenerator, n: u32) {
        for _ in 0..500 {
            if gen.started.load(Ordering::SeqCst) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("generator never started {n} jobs");
    }

    #[tokio::test]
    async fn test_job_completes_with_deterministic_key() {
        let (_dir, scratch, orch) = setup(config(2), Arc::new(FixedGenerator::ok()), Arc::new(MockStore::ok())).await;

        let snap = orch.submit(topic()).unwrap();
        assert_eq!(snap.status, JobStatus::Pending);

        let done = wait_terminal(&orch, &snap.id).await;
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.result_ref, Some(format!("episodes/{}", snap.id)));
        assert_eq!(done.result_url, Some(format!("mem://episodes/{}", snap.id)));
        assert_eq!(done.upload_attempts, 1);
        assert!(done.completed_at.is_some());
        assert!(done.error.is_none());
        assert!(scratch.allocations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generation_error_fails_and_releases_scratch() {
        let gen = FixedGenerator {
            fail_with: Some("tts quota exceeded".into()),
            ..FixedGenerator::ok()
        };
        let store = Arc::new(MockStore::ok());
        let (_dir, scratch, orch) = setup(config(2), Arc::new(gen), store.clone()).await;

        let snap = orch.submit(topic()).unwrap();
        let done = wait_terminal(&orch, &snap.id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.error_kind.as_deref(), Some("GenerationError"));
        assert!(done.error.unwrap().contains("tts quota exceeded"));
        assert!(done.result_ref.is_none());
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert!(scratch.allocations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generation_timeout() {
        let gen = FixedGenerator {
            delay: Some(Duration::from_secs(30)),
            ..FixedGenerator::ok()
        };
        let mut cfg = config(2);
        cfg.generation_timeout = Duration::from_millis(50);
        let (_dir, scratch, orch) = setup(cfg, Arc::new(gen), Arc::new(MockStore::ok())).await;

        let snap = orch.submit(topic()).unwrap();
        let done = wait_terminal(&orch, &snap.id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.error_kind.as_deref(), Some("GenerationTimeout"));
        assert!(scratch.allocations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_upload_retried_until_success() {
        let store = Arc::new(MockStore::failing(2, StoreError::Transient("503".into())));
        let (_dir, _scratch, orch) = setup(config(2), Arc::new(FixedGenerator::ok()), store.clone()).await;

        let snap = orch.submit(topic()).unwrap();
        let done = wait_terminal(&orch, &snap.id).await;

        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.upload_attempts, 3);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_upload_exhaustion() {
        let store = Arc::new(MockStore::failing(u32::MAX, StoreError::Transient("503".into())));
        let (_dir, scratch, orch) = setup(config(2), Arc::new(FixedGenerator::ok()), store.clone()).await;

        let snap = orch.submit(topic()).unwrap();
        let done = wait_terminal(&orch, &snap.id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.error_kind.as_deref(), Some("UploadFailed"));
        assert_eq!(done.upload_attempts, 3);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert!(scratch.allocations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_permanent_upload_single_attempt() {
        let store = Arc::new(MockStore::failing(u32::MAX, StoreError::Permanent("403".into())));
        let (_dir, _scratch, orch) = setup(config(2), Arc::new(FixedGenerator::ok()), store.clone()).await;

        let snap = orch.submit(topic()).unwrap();
        let done = wait_terminal(&orch, &snap.id).await;

        assert_eq!(done.error_kind.as_deref(), Some("UploadFailed"));
        assert_eq!(done.upload_attempts, 1);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_admission_limit_and_scratch_correspondence() {
        let gate = Arc::new(Semaphore::new(0));
        let gen = Arc::new(FixedGenerator {
            gate: Some(gate.clone()),
            ..FixedGenerator::ok()
        });
        let (_dir, scratch, orch) = setup(config(2), gen.clone(), Arc::new(MockStore::ok())).await;

        let a = orch.submit(topic()).unwrap();
        let b = orch.submit(topic()).unwrap();
        assert_eq!(
            orch.submit(topic()).unwrap_err(),
            SubmitError::Overloaded { limit: 2 }
        );
        assert_eq!(orch.in_flight(), 2);

        wait_started(&gen, 2).await;
        let live = scratch.allocations().await.unwrap();
        assert_eq!(live.len(), 2);
        for id in [&a.id, &b.id] {
            assert_eq!(orch.get(id).unwrap().status, JobStatus::Running);
            assert!(live.contains(&scratch.root().join(format!("job-{id}"))));
        }

        gate.add_permits(2);
        assert_eq!(wait_terminal(&orch, &a.id).await.status, JobStatus::Done);
        assert_eq!(wait_terminal(&orch, &b.id).await.status, JobStatus::Done);
        assert!(scratch.allocations().await.unwrap().is_empty());

        // capacity is returned once jobs finish
        for _ in 0..100 {
            if orch.in_flight() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(orch.submit(topic()).is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_after_grace() {
        let gate = Arc::new(Semaphore::new(0));
        let gen = Arc::new(FixedGenerator {
            gate: Some(gate),
            ..FixedGenerator::ok()
        });
        let (_dir, scratch, orch) = setup(config(2), gen.clone(), Arc::new(MockStore::ok())).await;

        let a = orch.submit(topic()).unwrap();
        let b = orch.submit(topic()).unwrap();
        wait_started(&gen, 2).await;

        let interrupted = orch.shutdown(Duration::from_millis(50)).await;
        assert_eq!(interrupted, 2);

        for id in [&a.id, &b.id] {
            let snap = orch.get(id).unwrap();
            assert_eq!(snap.status, JobStatus::Failed);
            assert_eq!(snap.error.as_deref(), Some("ShutdownInterrupted"));
        }
        assert!(scratch.allocations().await.unwrap().is_empty());
        assert_eq!(orch.submit(topic()).unwrap_err(), SubmitError::ShuttingDown);
    }

    #[tokio::test]
    async fn test_shutdown_drains_quick_jobs() {
        let (_dir, _scratch, orch) = setup(config(2), Arc::new(FixedGenerator::ok()), Arc::new(MockStore::ok())).await;

        let a = orch.submit(topic()).unwrap();
        assert_eq!(orch.shutdown(Duration::from_secs(5)).await, 0);
        assert_eq!(orch.get(&a.id).unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_retention_expiry_and_eviction() {
        let mut cfg = config(2);
        cfg.job_retention = Duration::ZERO;
        let (_dir, _scratch, orch) = setup(cfg, Arc::new(FixedGenerator::ok()), Arc::new(MockStore::ok())).await;

        let snap = orch.submit(topic()).unwrap();
        orch.shutdown(Duration::from_secs(5)).await;

        assert!(orch.get(&snap.id).is_none());
        assert!(orch.list().is_empty());
        assert_eq!(orch.evict_expired(), 1);
        assert_eq!(orch.evict_expired(), 0);
    }

    #[tokio::test]
    async fn test_unknown_job_is_none() {
        let (_dir, _scratch, orch) = setup(config(1), Arc::new(FixedGenerator::ok()), Arc::new(MockStore::ok())).await;
        assert!(orch.get(&JobId::from("nope")).is_none());
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let (_dir, _scratch, orch) = setup(config(4), Arc::new(FixedGenerator::ok()), Arc::new(MockStore::ok())).await;
        let first = orch.submit(topic()).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = orch.submit(topic()).unwrap();

        let listed = orch.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[tokio::test]
    async fn test_upload_refused_unless_job_is_running() {
        let store = Arc::new(MockStore::ok());
        let (dir, _scratch, orch) = setup(config(1), Arc::new(FixedGenerator::ok()), store.clone()).await;
        let work = dir.path().join("work");
        std::fs::create_dir(&work).unwrap();

        // never started, so Running -> Uploading is not available
        let id = JobId::from("stale");
        let entry = JobEntry {
            job: Mutex::new(Job::new(id.clone(), topic())),
        };
        let outcome = orch.pipeline(&entry, &id, topic(), &work).await;

        let Err(failure) = outcome.result else {
            panic!("pipeline must not upload from the wrong state");
        };
        assert_eq!(failure.kind(), "InternalError");
        assert_eq!(outcome.attempts, 0);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert_eq!(entry.lock().status(), JobStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_jobs_admitted_during_shutdown_are_drained() {
        let (_dir, _scratch, orch) = setup(config(64), Arc::new(FixedGenerator::ok()), Arc::new(MockStore::ok())).await;

        let submitters: Vec<_> = (0..4)
            .map(|_| {
                let orch = Arc::clone(&orch);
                tokio::spawn(async move {
                    let mut admitted = Vec::new();
                    loop {
                        match orch.submit(topic()) {
                            Ok(snap) => admitted.push(snap.id),
                            Err(SubmitError::ShuttingDown) => return admitted,
                            Err(SubmitError::Overloaded { .. }) => {}
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        orch.shutdown(Duration::from_secs(10)).await;

        let mut total = 0;
        for task in submitters {
            for id in task.await.unwrap() {
                total += 1;
                let snap = orch.get(&id).unwrap();
                assert!(snap.status.is_terminal(), "job {id} still {} after shutdown", snap.status);
            }
        }
        assert!(total > 0);
        assert_eq!(orch.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_feed_published_after_each_done_job() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = dir.path().join("bucket");
        let scratch = ScratchManager::new(dir.path().join("scratch"));
        scratch.init().await.unwrap();
        let mut cfg = config(2);
        cfg.publish_feed = true;
        cfg.feed.key = "podcast/feed.rss".into();
        let orch = JobOrchestrator::new(
            cfg,
            scratch.clone(),
            Arc::new(FixedGenerator::ok()),
            Arc::new(crate::store::FsStore::new(&bucket)),
        );

        let first = orch.submit(topic()).unwrap();
        wait_terminal(&orch, &first.id).await;
        let second = orch.submit(topic()).unwrap();
        wait_terminal(&orch, &second.id).await;
        assert_eq!(orch.shutdown(Duration::from_secs(5)).await, 0);

        let feed = std::fs::read_to_string(bucket.join("podcast/feed.rss")).unwrap();
        assert_eq!(feed.matches("<item>").count(), 2);
        for id in [&first.id, &second.id] {
            assert!(feed.contains(&format!("<guid isPermaLink=\"false\">{id}</guid>")));
        }

        // staged copies are cleaned up
        let leftovers: Vec<_> = std::fs::read_dir(scratch.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".feed-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_failed_jobs_do_not_publish_feed() {
        let gen = FixedGenerator {
            fail_with: Some("no topics".into()),
            ..FixedGenerator::ok()
        };
        let store = Arc::new(MockStore::ok());
        let mut cfg = config(1);
        cfg.publish_feed = true;
        let (_dir, _scratch, orch) = setup(cfg, Arc::new(gen), store.clone()).await;

        orch.submit(topic()).unwrap();
        orch.shutdown(Duration::from_secs(5)).await;
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }
}
