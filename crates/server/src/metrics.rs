//! Prometheus recorder for the job metrics.
//!
//! The core crate records through the `metrics` facade; the server installs
//! one process-wide recorder and scrapes it on `GET /metrics`.

use std::sync::OnceLock;

use episode_forge_core::JobOrchestrator;
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Content type of the Prometheus text exposition format.
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder once per process and return its handle.
/// Repeat calls hand back the first handle.
pub fn install_recorder() -> PrometheusHandle {
    RECORDER
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                tracing::warn!("A global metrics recorder was already set; /metrics will be empty");
            } else {
                describe_job_metrics();
                tracing::info!("Prometheus recorder installed");
            }
            handle
        })
        .clone()
}

fn describe_job_metrics() {
    describe_counter!("jobs_submitted_total", "Jobs admitted by POST /jobs");
    describe_counter!(
        "jobs_rejected_total",
        "Jobs refused at admission, by reason (overloaded, shutting_down)"
    );
    describe_counter!("jobs_finished_total", "Jobs reaching a terminal state, by outcome");
    describe_counter!("upload_attempts_total", "Object store upload attempts, by store");
    describe_histogram!(
        "job_duration_seconds",
        "Wall time from job start to terminal state in seconds"
    );
    describe_gauge!("jobs_in_flight", "Jobs currently holding an admission slot");
    describe_gauge!("jobs_retained", "Jobs still queryable within the retention window");
    describe_gauge!("jobs_accepting", "1 while new jobs are admitted, 0 once draining");
}

/// Refresh the point-in-time gauges from the orchestrator, then render.
/// `None` until [`install_recorder`] has run.
pub fn scrape(orchestrator: &JobOrchestrator) -> Option<String> {
    let handle = RECORDER.get()?;
    gauge!("jobs_in_flight").set(orchestrator.in_flight() as f64);
    gauge!("jobs_retained").set(orchestrator.list().len() as f64);
    gauge!("jobs_accepting").set(if orchestrator.is_accepting() { 1.0 } else { 0.0 });
    Some(handle.render())
}
