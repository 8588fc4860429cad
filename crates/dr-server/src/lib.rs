//! dr-server: HTTP admission API, job queue, worker pool and delivery.
//!
//! This crate ties dr-core and dr-engine into a running service. It provides:
//!
//! - Axum-based HTTP API for admission, status, health and job lookup
//! - In-memory job queue and concurrent status table
//! - Fixed-size worker pool with per-key serialization
//! - Result delivery with per-variant retry and backoff
//! - Periodic stale-process reaping and graceful shutdown

pub mod admission;
pub mod context;
pub mod delivery;
pub mod error;
pub mod locks;
pub mod middleware;
pub mod queue;
pub mod router;
pub mod routes;
pub mod status;
pub mod worker;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use dr_core::config::Config;

pub use context::AppContext;

/// Start the docrelay server.
///
/// Builds the [`AppContext`], binds the configured address and serves until
/// SIGINT or SIGTERM.
pub async fn start(config: Config) -> dr_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let ctx = AppContext::new(config);
    ctx.orchestrator.store().ensure_dir()?;
    tracing::info!(dir = %ctx.orchestrator.store().dir().display(), "Artifact directory ready");

    let availability = ctx.orchestrator.prober().refresh().await;
    for engine in &availability.0 {
        if engine.available {
            tracing::info!(engine = %engine.engine, "Engine available");
        } else {
            tracing::warn!(engine = %engine.engine, "Engine unavailable");
        }
    }

    let addr: SocketAddr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port)
        .parse()
        .map_err(|e| dr_core::Error::Internal(format!("Invalid server address: {e}")))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| dr_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;
    tracing::info!("Starting server on {addr}");

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    serve(ctx, listener, cancel).await
}

/// Run workers, the periodic reaper and the HTTP server on `listener` until
/// `cancel` fires, then wait for in-flight jobs to finish.
pub async fn serve(
    ctx: AppContext,
    listener: TcpListener,
    cancel: CancellationToken,
) -> dr_core::Result<()> {
    let workers = worker::spawn_workers(&ctx, cancel.clone());

    let reaper = ctx.config.reaper.enabled.then(|| {
        dr_engine::spawn_periodic_sweep(
            ctx.orchestrator.reaper().clone(),
            ctx.config.reaper.interval(),
            cancel.clone(),
        )
    });

    let app = router::build_router(ctx.clone());
    let http_cancel = cancel.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { http_cancel.cancelled().await })
        .await;

    // Make sure background tasks stop even if the server exited on its own.
    cancel.cancel();

    let in_flight = ctx.workers.running();
    if in_flight > 0 {
        tracing::info!(in_flight, "Waiting for in-flight jobs");
    }
    join_workers(workers).await;
    if let Some(reaper) = reaper {
        if let Err(e) = reaper.await {
            tracing::error!(error = %e, "Periodic reaper ended abnormally");
        }
    }

    tracing::info!(abandoned = ctx.queue.size(), "Server shutdown complete");
    served.map_err(|source| dr_core::Error::Io { source })
}

async fn join_workers(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task ended abnormally");
        }
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
