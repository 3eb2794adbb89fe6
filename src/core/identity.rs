// src/core/identity.rs

//! Identity & Config (C1): `serverId()`.
//!
//! The identifier is stable for the lifetime of the process: it is read
//! once from configuration (`MIRTH_SERVER_ID` / `config.server_id`) or, if
//! absent, freshly generated and cached for every subsequent call.

use once_cell::sync::OnceCell;
use uuid::Uuid;

/// A process-lifetime-stable server identity.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    id: String,
}

impl ServerIdentity {
    /// Resolves the identity once: from the supplied config value, or a
    /// freshly generated UUID. Subsequent calls on the returned value never
    /// change `id()`.
    pub fn resolve(configured: Option<&str>) -> Self {
        static GENERATED: OnceCell<String> = OnceCell::new();

        let id = match configured {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => GENERATED
                .get_or_init(|| Uuid::new_v4().to_string())
                .clone(),
        };
        Self { id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}
