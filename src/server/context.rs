// src/server/context.rs

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::core::error::EngineResult;
use crate::core::state::EngineState;

/// Holds all the initialized state required to run the process's main loop.
pub struct ServerContext {
    pub state: Arc<EngineState>,
    pub listener: TcpListener,
    pub shutdown_rx: watch::Receiver<bool>,
    pub background_tasks: JoinSet<EngineResult<()>>,
}
