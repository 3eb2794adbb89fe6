// src/server/mod.rs

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{filter::EnvFilter, reload};

use crate::config::Config;

mod connection_loop;
mod context;
mod http;
mod initialization;
mod metrics_server;
mod spawner;

/// The main process startup function, orchestrating all setup phases.
pub async fn run(
    config: Config,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<()> {
    // 1. Initialize engine state and bind the HTTP listener.
    let mut server_context = initialization::setup(config, log_reload_handle).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context).await?;

    // 3. Run the HTTP API and background-task supervisor until shutdown.
    connection_loop::run(server_context).await;

    Ok(())
}
