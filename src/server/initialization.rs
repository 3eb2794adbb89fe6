// src/server/initialization.rs

//! Handles the complete process initialization: configuration is already
//! loaded by the caller; this opens the database pool via `EngineState`,
//! binds the HTTP listener, and logs the chosen operating mode.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, reload};

use super::context::ServerContext;
use crate::config::Config;
use crate::core::state::EngineState;

/// Initializes all process components before starting the main loop.
pub async fn setup(
    config: Config,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<ServerContext> {
    log_startup_info(&config);

    let host = config.host.clone();
    let port = config.port;

    let init = EngineState::initialize(config, log_reload_handle).await?;
    let state = init.state;
    info!(server_id = state.identity.id(), "engine state initialized");

    let listener = TcpListener::bind((host.as_str(), port)).await?;
    info!("engine listening on {}:{}", host, port);

    Ok(ServerContext {
        state,
        listener,
        shutdown_rx: init.shutdown_rx,
        background_tasks: tokio::task::JoinSet::new(),
    })
}

fn log_startup_info(config: &Config) {
    if config.cluster.enabled {
        info!(
            mode = ?config.mode,
            polling_mode = ?config.cluster.polling_mode,
            "starting in CLUSTER mode"
        );
        warn!("--------------------------------------------------------------------------------");
        warn!("CLUSTER MODE: ensure every instance shares the same database and a synchronized");
        warn!("clock (NTP). Polling leases and quorum accounting assume clock skew is bounded.");
        warn!("--------------------------------------------------------------------------------");
    } else {
        info!("starting in STANDALONE mode");
    }
}
