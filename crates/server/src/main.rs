// crates/server/src/main.rs
//! Episode-forge server binary.
//!
//! Binds the HTTP listener **first** so health checks get a 503 instead of a
//! connection error, then runs the startup self-check and flips readiness.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use episode_forge_core::health::{run_self_check, self_check_loop};
use episode_forge_core::{HealthState, JobOrchestrator, ObjectStore, ScratchManager, ServiceConfig};
use episode_forge_server::observability::init_tracing;
use episode_forge_server::shutdown::install_shutdown_handler;
use episode_forge_server::{create_app, install_recorder, AppState};
use tokio_util::sync::CancellationToken;

/// Generate podcast episodes on demand and upload them to object storage.
#[derive(Debug, Parser)]
#[command(name = "episode-forge", version)]
struct Cli {
    /// Port to listen on (overrides PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Root directory for per-job scratch space (overrides SCRATCH_ROOT).
    #[arg(long)]
    scratch_root: Option<PathBuf>,
}

/// Retry the self-check until it passes, then mark the process ready.
/// Returns `false` if shutdown arrived first, even mid-check.
async fn become_ready(
    health: &HealthState,
    scratch: &ScratchManager,
    store: &dyn ObjectStore,
    retry_every: Duration,
    limit: Duration,
    shutdown: &CancellationToken,
) -> bool {
    loop {
        let result = tokio::select! {
            _ = shutdown.cancelled() => return false,
            result = run_self_check(scratch, store, limit) => result,
        };
        match result {
            Ok(()) => {
                health.record_self_check();
                health.mark_ready();
                tracing::info!(store = store.name(), "Startup self-check passed, ready");
                return true;
            }
            Err(e) => {
                tracing::error!(error = %e, retry_secs = retry_every.as_secs(), "Startup self-check failed");
            }
        }
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = tokio::time::sleep(retry_every) => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ServiceConfig::from_env().context("invalid configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(root) = cli.scratch_root {
        config.scratch_root = root;
    }

    init_tracing(config.log_format)?;
    install_recorder();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting episode-forge");

    // Step 1: Scratch root, sweeping anything a previous process left behind
    let scratch = ScratchManager::new(&config.scratch_root);
    scratch
        .init()
        .await
        .with_context(|| format!("cannot prepare scratch root {}", config.scratch_root.display()))?;

    // Step 2: Collaborators and shared state
    let store = config.store.build(config.retry.attempt_timeout);
    let generator = config.generator.build();
    tracing::info!(store = store.name(), generator = generator.name(), "Collaborators configured");

    let orchestrator = JobOrchestrator::new(config.orchestrator(), scratch.clone(), generator, store.clone());
    let health = Arc::new(HealthState::new(config.health_staleness));
    let state = AppState::new(orchestrator.clone(), health.clone());
    let app = create_app(state, config.max_body_bytes);

    // Step 3: Bind before readiness
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    tracing::info!(%addr, "Listening");

    let shutdown = install_shutdown_handler();
    let http_stop = CancellationToken::new();
    let stop = http_stop.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(stop.cancelled_owned())
            .await
    });

    // Jobs are admitted before readiness, so eviction cannot wait for it.
    let background = CancellationToken::new();
    let sweep_every = (config.job_retention / 2).clamp(Duration::from_secs(1), Duration::from_secs(60));
    tokio::spawn(
        orchestrator
            .clone()
            .run_retention_sweeper(sweep_every, background.clone()),
    );

    // Step 4: Readiness
    let check_limit = config.self_check_timeout();
    if become_ready(
        &health,
        &scratch,
        store.as_ref(),
        config.self_check_interval,
        check_limit,
        &shutdown,
    )
    .await
    {
        tokio::spawn(self_check_loop(
            health.clone(),
            scratch.clone(),
            store.clone(),
            config.self_check_interval,
            check_limit,
            background.clone(),
        ));
    }

    // Step 5: Drain. The HTTP listener stays up so clients can keep polling.
    shutdown.cancelled().await;
    health.mark_not_ready();
    let interrupted = orchestrator.shutdown(config.shutdown_grace).await;
    if interrupted > 0 {
        tracing::warn!(interrupted, "Jobs interrupted by shutdown");
    }
    background.cancel();

    http_stop.cancel();
    server.await.context("HTTP server task panicked")??;
    tracing::info!("Shutdown complete");
    Ok(())
}
