// src/server/connection_loop.rs

//! The main process loop: serves the HTTP API, monitors background tasks,
//! and drives the graceful shutdown sequence (C10).

use std::time::Duration;

use tracing::{error, info, warn};

use super::context::ServerContext;
use super::http;
use crate::core::cluster::registry::ServerStatus;

#[cfg(windows)]
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Waits for a shutdown signal based on the operating system: SIGINT/SIGTERM
/// on Unix, Ctrl-C on Windows.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    #[cfg(windows)]
    let mut ctrl_c = signal::ctrl_c().expect("failed to install Ctrl-C handler");

    tokio::select! {
        _ = async { #[cfg(unix)] { sigint.recv().await; info!("SIGINT received, initiating graceful shutdown."); } } => {},
        _ = async { #[cfg(unix)] { sigterm.recv().await; info!("SIGTERM received, initiating graceful shutdown."); } } => {},
        _ = async { #[cfg(windows)] { ctrl_c.await; info!("Ctrl-C received, initiating graceful shutdown."); } } => {},
    }
}

/// Runs the HTTP API and the background-task supervisor until a shutdown
/// signal arrives or a background task fails, then drains gracefully.
pub async fn run(mut ctx: ServerContext) {
    let app = http::router(ctx.state.clone());
    let mut http_shutdown_rx = ctx.shutdown_rx.clone();

    let http_task = tokio::spawn(async move {
        axum::serve(ctx.listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown_rx.wait_for(|v| *v).await;
            })
            .await
    });

    loop {
        tokio::select! {
            biased;

            _ = await_shutdown_signal() => {
                break;
            },

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => info!("a background task completed"),
                    Ok(Err(e)) => { error!("CRITICAL: background task failed: {e}. Shutting down."); break; }
                    Err(e) => { error!("CRITICAL: background task panicked: {e:?}. Shutting down."); break; }
                }
            },
        }
    }

    info!("Shutting down. Signaling all tasks to drain.");
    ctx.state.begin_shutdown();

    let shutdown_grace = ctx.state.config.lock().await.shutdown_grace;

    if ctx.state.config.lock().await.cluster.enabled {
        if let Err(e) = ctx
            .state
            .server_registry
            .heartbeat(ctx.state.identity.id(), None, None, None, ServerStatus::Offline)
            .await
        {
            warn!("failed to mark this server OFFLINE during shutdown: {e}");
        }
    }

    if tokio::time::timeout(shutdown_grace, http_task).await.is_err() {
        warn!("timed out waiting for the HTTP server to drain within the shutdown grace period");
    }

    if tokio::time::timeout(Duration::from_secs(5), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("timed out waiting for background tasks to finish cleanly");
    }

    info!("Shutdown complete.");
}
