// src/server/spawner.rs

//! Spawns all of the process's long-running background tasks: the metrics
//! exporter and the cluster heartbeat/quorum loop.

use anyhow::Result;
use tracing::info;

use super::context::ServerContext;
use super::metrics_server;
use crate::core::cluster::registry::ServerStatus;

/// Spawns all background tasks into the context's `JoinSet`, then marks
/// startup complete. There is no static initial deploy-set in this process;
/// channels are deployed at runtime via the Engine Controller, so startup
/// is declared complete as soon as the process is ready to accept work.
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let state = ctx.state.clone();
    let background_tasks = &mut ctx.background_tasks;

    let metrics_enabled = state.config.lock().await.metrics.enabled;
    if metrics_enabled {
        let metrics_state = state.clone();
        let shutdown_rx = ctx.shutdown_rx.clone();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_state, shutdown_rx).await;
            Ok(())
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    let cluster_enabled = state.config.lock().await.cluster.enabled;
    if cluster_enabled {
        let cluster_state = state.clone();
        let mut shutdown_rx = ctx.shutdown_rx.clone();
        background_tasks.spawn(async move {
            let heartbeat_interval = cluster_state.config.lock().await.cluster.heartbeat_interval;
            let mut interval = tokio::time::interval(heartbeat_interval);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let (api_url, port) = {
                            let config = cluster_state.config.lock().await;
                            (config.api_url.clone(), config.port)
                        };
                        let hostname = std::env::var("HOSTNAME").ok();
                        cluster_state
                            .server_registry
                            .heartbeat(
                                cluster_state.identity.id(),
                                hostname.as_deref(),
                                Some(port as i32),
                                api_url.as_deref(),
                                ServerStatus::Online,
                            )
                            .await?;
                        let quorum = cluster_state.server_registry.has_quorum().await?;
                        cluster_state.health.set_has_quorum(quorum);
                    }
                }
            }
            Ok(())
        });
    } else {
        // Standalone instances never wait on a quorum that doesn't exist.
        state.health.set_has_quorum(true);
    }

    // No static channel set to wait on; the process is ready for deploys
    // as soon as its background tasks are running.
    state.health.mark_startup_complete();

    info!("All background tasks have been spawned.");
    Ok(())
}
