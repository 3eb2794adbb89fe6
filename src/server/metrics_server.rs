// src/server/metrics_server.rs

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use tokio::sync::watch;
use tracing::{error, info};

use crate::core::metrics::gather_metrics;
use crate::core::state::EngineState;

/// Handles HTTP requests to the `/metrics` endpoint, refreshing cluster
/// gauges before encoding all registered metrics in Prometheus text format.
async fn metrics_handler(state: Arc<EngineState>) -> impl IntoResponse {
    if state.config.lock().await.cluster.enabled
        && let Ok(quorum) = state.server_registry.has_quorum().await
    {
        state.health.set_has_quorum(quorum);
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

/// Runs a simple HTTP server to expose Prometheus metrics on `/metrics`.
pub async fn run_metrics_server(state: Arc<EngineState>, mut shutdown_rx: watch::Receiver<bool>) {
    let port = state.config.lock().await.metrics.port;

    let app = Router::new().route("/metrics", get(move || metrics_handler(state.clone())));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Prometheus metrics server listening on http://{addr}/metrics");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server on port {port}: {e}");
            return;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|v| *v).await;
            info!("Metrics server shutting down.");
        })
        .await
        .unwrap();
}
