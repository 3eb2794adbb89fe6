// src/core/cluster/poll_authority.rs

//! Combines the Mode Controller (C7) and Polling Lease Manager (C5) into
//! the single authorization check the Channel Runtime consults before each
//! source poll (§4.7).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::cluster::lease::LeaseManager;
use crate::core::cluster::mode::ModeController;
use crate::core::connector::PollAuthority;
use crate::core::error::EngineResult;

/// Source connector-messages are always recorded under metadata_id 0, the
/// same convention the pipeline uses for the source connector-message row.
const SOURCE_METADATA_ID: i32 = 0;

/// The `PollAuthority` used by every cluster-aware deployment: mode denies
/// polling outright in shadow mode or off the takeover allow-list, and the
/// lease manager arbitrates which single instance polls when several
/// deployments share a channel.
pub struct ClusterPollAuthority {
    mode_controller: Arc<Mutex<ModeController>>,
    lease_manager: Arc<LeaseManager>,
}

impl ClusterPollAuthority {
    pub fn new(mode_controller: Arc<Mutex<ModeController>>, lease_manager: Arc<LeaseManager>) -> Self {
        Self {
            mode_controller,
            lease_manager,
        }
    }
}

#[async_trait]
impl PollAuthority for ClusterPollAuthority {
    async fn authorize(&self, channel_id: &str) -> EngineResult<bool> {
        if self.mode_controller.lock().await.may_poll(channel_id).is_err() {
            return Ok(false);
        }
        self.lease_manager.acquire(channel_id, SOURCE_METADATA_ID).await
    }
}
