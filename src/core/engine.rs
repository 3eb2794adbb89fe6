// src/core/engine.rs

//! Engine Controller (C9): the single public surface coordinating channel
//! deployment and the `dispatchRawMessage` entry point used by both local
//! source connectors and the remote dispatcher (C6).

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::core::channel::ChannelRuntime;
use crate::core::cluster::ChannelRegistry;
use crate::core::error::{EngineError, EngineResult};
use crate::core::sequence::SequenceSource;
use crate::core::store::traits::MessageStore;

/// A lightweight handle returned by `get_deployed_channel`.
pub struct ChannelHandle {
    pub channel_id: String,
    pub runtime: Arc<ChannelRuntime>,
}

/// Deploys, undeploys, and drives the lifecycle of every channel known to
/// this instance. All commands are idempotent with respect to channels
/// already in their target state.
pub struct EngineController {
    channels: DashMap<String, Arc<ChannelRuntime>>,
    store: Arc<dyn MessageStore>,
    sequence: Arc<dyn SequenceSource>,
    channel_registry: Arc<ChannelRegistry>,
    server_id: String,
}

impl EngineController {
    pub fn new(
        store: Arc<dyn MessageStore>,
        sequence: Arc<dyn SequenceSource>,
        channel_registry: Arc<ChannelRegistry>,
        server_id: String,
    ) -> Self {
        Self {
            channels: DashMap::new(),
            store,
            sequence,
            channel_registry,
            server_id,
        }
    }

    /// `deploy(channelConfig)`. The caller has already constructed the
    /// runtime (source/destination connectors, scripts); this registers it,
    /// drives UNDEPLOYED -> STOPPED, and claims ownership in the durable
    /// channel registry so peers can route dispatches here (C6).
    pub async fn deploy(&self, channel_id: &str, runtime: Arc<ChannelRuntime>) -> EngineResult<()> {
        runtime.deploy().await?;
        self.sequence.ensure_channel(channel_id).await?;
        self.channel_registry.set_owner(channel_id, &self.server_id).await?;
        self.channels.insert(channel_id.to_string(), runtime);
        Ok(())
    }

    /// `undeploy(channelId)`. Stops the runtime first if still running, then
    /// removes both the local handle and the durable registry row.
    pub async fn undeploy(&self, channel_id: &str) -> EngineResult<()> {
        if let Some((_, runtime)) = self.channels.remove(channel_id) {
            let _ = runtime.stop().await;
            runtime.undeploy().await;
        }
        self.channel_registry.clear_owner(channel_id).await?;
        Ok(())
    }

    pub async fn start(&self, channel_id: &str) -> EngineResult<()> {
        let runtime = self.get(channel_id)?;
        runtime.start(self.store.clone(), self.sequence.clone()).await
    }

    pub async fn stop(&self, channel_id: &str) -> EngineResult<()> {
        self.get(channel_id)?.stop().await
    }

    pub async fn pause(&self, channel_id: &str) -> EngineResult<()> {
        self.get(channel_id)?.pause().await
    }

    pub async fn resume(&self, channel_id: &str) -> EngineResult<()> {
        self.get(channel_id)?.resume().await
    }

    /// The single entry point used by source connectors and the remote
    /// dispatcher.
    pub async fn dispatch_raw_message(
        &self,
        channel_id: &str,
        raw: &[u8],
        data_type: Option<&str>,
        source_map: Value,
    ) -> EngineResult<(i64, Option<Vec<u8>>)> {
        let runtime = self.get(channel_id)?;
        runtime
            .dispatch_raw_message(self.store.as_ref(), self.sequence.as_ref(), raw, data_type, source_map)
            .await
    }

    pub fn get_deployed_channel(&self, channel_id: &str) -> Option<ChannelHandle> {
        self.channels.get(channel_id).map(|entry| ChannelHandle {
            channel_id: channel_id.to_string(),
            runtime: entry.value().clone(),
        })
    }

    pub fn deployed_channel_ids(&self) -> Vec<String> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    fn get(&self, channel_id: &str) -> EngineResult<Arc<ChannelRuntime>> {
        self.channels
            .get(channel_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::NotFound(format!("channel '{channel_id}' is not deployed")))
    }
}
