// src/core/cluster/mode.rs

//! Mode Controller (C7): decides, per channel, whether this instance is
//! allowed to poll a source and process the result locally, given the
//! configured `auto` / `shadow` / `takeover` discipline.

use std::collections::HashSet;

use crate::config::EngineMode;
use crate::core::error::{EngineError, EngineResult};

/// Arbitrates local polling permission and write access under the three
/// supported modes.
///
/// - `Auto`: this instance owns and polls whatever channels it deploys, and
///   accepts all mutating requests, subject only to the lease manager (C5).
/// - `Shadow`: this instance shadows state replicated from a peer. Mutating
///   REST requests are rejected as a conflict and polling source connectors
///   stay off, except on channels explicitly *promoted* on this instance,
///   which behave as if this instance were the owner.
/// - `Takeover`: mutating requests are always accepted, but polling source
///   connectors stay off by default until a channel is named in the
///   takeover allow-list (operator-curated, e.g. while migrating a legacy
///   deployment channel by channel).
pub struct ModeController {
    mode: EngineMode,
    allow_list: HashSet<String>,
    promoted: HashSet<String>,
}

impl ModeController {
    pub fn new(mode: EngineMode, allow_list: Vec<String>) -> Self {
        Self {
            mode,
            allow_list: allow_list.into_iter().collect(),
            promoted: HashSet::new(),
        }
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// Whether `channel_id` may be polled locally under the current mode.
    pub fn may_poll(&self, channel_id: &str) -> EngineResult<()> {
        match self.mode {
            EngineMode::Auto => Ok(()),
            EngineMode::Shadow => {
                if self.promoted.contains(channel_id) {
                    Ok(())
                } else {
                    Err(EngineError::Conflict(format!(
                        "channel '{channel_id}' cannot poll: this instance is in shadow mode and the channel is not promoted"
                    )))
                }
            }
            EngineMode::Takeover => {
                if self.allow_list.contains(channel_id) {
                    Ok(())
                } else {
                    Err(EngineError::Conflict(format!(
                        "channel '{channel_id}' is not on the takeover poll allow-list"
                    )))
                }
            }
        }
    }

    /// Whether a mutating REST request against `channel_id` may proceed.
    /// Consulted by the dispatching middleware on every `POST`/`PUT`/
    /// `DELETE`/`PATCH`; GETs bypass this check entirely.
    pub fn is_mutation_allowed(&self, channel_id: &str) -> EngineResult<()> {
        match self.mode {
            EngineMode::Auto | EngineMode::Takeover => Ok(()),
            EngineMode::Shadow => {
                if self.promoted.contains(channel_id) {
                    Ok(())
                } else {
                    Err(EngineError::Conflict(format!(
                        "channel '{channel_id}' is read-only: this instance is in shadow mode and the channel is not promoted"
                    )))
                }
            }
        }
    }

    /// Promotes a channel on this instance: in shadow mode it unlocks both
    /// writes and polling for the channel, as if this instance owned it.
    pub fn promote(&mut self, channel_id: &str) {
        self.promoted.insert(channel_id.to_string());
    }

    pub fn revoke_promotion(&mut self, channel_id: &str) {
        self.promoted.remove(channel_id);
    }

    pub fn is_promoted(&self, channel_id: &str) -> bool {
        self.promoted.contains(channel_id)
    }

    /// Adds a channel to the takeover poll allow-list at runtime, e.g. via
    /// an administrative API call during a staged cutover.
    pub fn allow_polling(&mut self, channel_id: &str) {
        self.allow_list.insert(channel_id.to_string());
    }

    pub fn revoke_polling(&mut self, channel_id: &str) {
        self.allow_list.remove(channel_id);
    }
}
