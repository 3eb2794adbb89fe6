// src/core/state.rs

//! The central `EngineState` struct, holding all shared, process-wide state.
//! Wrapped in an `Arc` and passed to every background task and HTTP handler.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing_subscriber::{filter::EnvFilter, reload};

use crate::config::Config;
use crate::core::cluster::{ChannelRegistry, ClusterPollAuthority, LeaseManager, ModeController, RemoteDispatcher, ServerRegistry};
use crate::core::connector::PollAuthority;
use crate::core::engine::EngineController;
use crate::core::error::{EngineError, EngineResult};
use crate::core::health::HealthState;
use crate::core::identity::ServerIdentity;
use crate::core::sequence::{SequenceAllocator, SequenceSource};
use crate::core::store::{PgMessageStore, MessageStore};

/// Bundles everything the spawner needs to start background tasks, returned
/// alongside the state by `EngineState::initialize`.
pub struct EngineInit {
    pub state: Arc<EngineState>,
    /// Broadcast-style shutdown signal; every background loop selects on a
    /// clone of its receiver.
    pub shutdown_rx: watch::Receiver<bool>,
}

/// The central struct holding all shared, process-wide state of the
/// healthcare integration engine.
pub struct EngineState {
    pub identity: ServerIdentity,
    pub config: Mutex<Config>,
    pub store: Arc<dyn MessageStore>,
    pub sequence: Arc<dyn SequenceSource>,
    pub engine: Arc<EngineController>,
    pub server_registry: Arc<ServerRegistry>,
    pub lease_manager: Arc<LeaseManager>,
    pub channel_registry: Arc<ChannelRegistry>,
    pub remote_dispatcher: Arc<RemoteDispatcher>,
    pub mode_controller: Arc<Mutex<ModeController>>,
    pub health: Arc<HealthState>,
    pub log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
    pub background_tasks: Mutex<JoinSet<EngineResult<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl EngineState {
    /// Initializes the entire engine state from the given configuration:
    /// opens the database pool, constructs every cluster/runtime component,
    /// and ensures the schema each owns exists.
    pub async fn initialize(
        config: Config,
        log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
    ) -> EngineResult<EngineInit> {
        let identity = ServerIdentity::resolve(config.server_id.as_deref());

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(&config.database_url)
            .await?;

        let store = Arc::new(PgMessageStore::new(pool.clone()));
        store.ensure_schema().await?;

        let server_registry = Arc::new(ServerRegistry::new(pool.clone(), config.cluster.heartbeat_timeout));
        server_registry.ensure_schema().await?;

        let lease_manager = Arc::new(LeaseManager::new(
            pool.clone(),
            identity.id().to_string(),
            config.cluster.lease_ttl,
        ));
        lease_manager.ensure_schema().await?;

        let sequence: Arc<dyn SequenceSource> =
            Arc::new(SequenceAllocator::new(pool.clone(), config.cluster.sequence_block_size));

        let channel_registry = Arc::new(ChannelRegistry::new(pool.clone()));
        channel_registry.ensure_schema().await?;
        let remote_dispatcher = Arc::new(RemoteDispatcher::new(
            config.cluster.secret.clone(),
            config.cluster.heartbeat_timeout,
        )?);
        let mode_controller = Arc::new(Mutex::new(ModeController::new(
            config.mode,
            config.takeover_poll_channels.clone(),
        )));

        let engine = Arc::new(EngineController::new(
            store.clone() as Arc<dyn MessageStore>,
            sequence.clone(),
            channel_registry.clone(),
            identity.id().to_string(),
        ));
        let health = Arc::new(HealthState::new());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = Arc::new(Self {
            identity,
            config: Mutex::new(config),
            store,
            sequence,
            engine,
            server_registry,
            lease_manager,
            channel_registry,
            remote_dispatcher,
            mode_controller,
            health,
            log_reload_handle,
            background_tasks: Mutex::new(JoinSet::new()),
            shutdown_tx,
        });

        Ok(EngineInit { state, shutdown_rx })
    }

    /// Begins graceful shutdown: flips readiness off, then the caller is
    /// responsible for marking this server OFFLINE in the registry and
    /// awaiting in-flight work within the configured grace period.
    pub fn begin_shutdown(&self) {
        self.health.begin_shutdown();
        let _ = self.shutdown_tx.send(true);
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// The `PollAuthority` an embedding application should pass to
    /// `ChannelRuntime::with_polling` for every polling-source channel it
    /// deploys, so source polling is subject to the same mode and lease
    /// arbitration as the rest of the cluster (C5, C7).
    pub fn poll_authority(&self) -> Arc<dyn PollAuthority> {
        Arc::new(ClusterPollAuthority::new(
            self.mode_controller.clone(),
            self.lease_manager.clone(),
        ))
    }

    pub async fn current_log_level(&self) -> String {
        self.config.lock().await.log_level.clone()
    }

    pub async fn set_log_level(&self, level: &str) -> EngineResult<()> {
        let filter = EnvFilter::try_new(level)
            .map_err(|e| EngineError::Configuration(format!("invalid log level '{level}': {e}")))?;
        self.log_reload_handle
            .reload(filter)
            .map_err(|e| EngineError::Internal(format!("reloading log filter: {e}")))?;
        self.config.lock().await.log_level = level.to_string();
        Ok(())
    }

    /// Dispatches a raw message to `channel_id`, routing to a peer over HTTP
    /// when the channel registry reports it deployed only elsewhere (C6).
    /// Locally deployed channels (including the common case of no cluster
    /// membership at all) are always served in-process.
    pub async fn route_dispatch(
        &self,
        channel_id: &str,
        raw: &[u8],
        source_map: serde_json::Value,
    ) -> EngineResult<i64> {
        self.mode_controller.lock().await.is_mutation_allowed(channel_id)?;

        if self.engine.get_deployed_channel(channel_id).is_some() {
            let (message_id, _response) = self
                .engine
                .dispatch_raw_message(channel_id, raw, None, source_map)
                .await?;
            return Ok(message_id);
        }

        let owner_id = self
            .channel_registry
            .owner_of(channel_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("channel '{channel_id}' is not deployed anywhere known")))?;

        let servers = self.server_registry.known_servers().await?;
        let owner = servers
            .into_iter()
            .find(|s| s.server_id == owner_id)
            .ok_or_else(|| EngineError::NotFound(format!("owner '{owner_id}' of channel '{channel_id}' is not a known server")))?;
        let api_url = owner
            .api_url
            .ok_or_else(|| EngineError::Configuration(format!("server '{owner_id}' has no api_url registered")))?;

        self.remote_dispatcher
            .dispatch(&api_url, channel_id, raw, Some(&source_map))
            .await
    }
}
