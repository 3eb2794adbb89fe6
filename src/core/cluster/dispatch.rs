// src/core/cluster/dispatch.rs

//! Channel Registry & Remote Dispatcher (C6): which instance has a channel
//! deployed, and how to hand a raw message to that instance over HTTP when
//! it isn't this one.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::core::error::{EngineError, EngineResult};
use crate::core::metrics::DISPATCH_DURATION_SECONDS;

const CLUSTER_SECRET_HEADER: &str = "X-Cluster-Secret";

#[derive(Serialize)]
struct DispatchRequest<'a> {
    #[serde(rename = "channelId")]
    channel_id: &'a str,
    #[serde(rename = "rawData")]
    raw_data: &'a str,
    #[serde(rename = "sourceMap", skip_serializing_if = "Option::is_none")]
    source_map: Option<&'a serde_json::Value>,
}

#[derive(Deserialize)]
struct DispatchResponse {
    #[serde(rename = "messageId")]
    message_id: i64,
    #[allow(dead_code)]
    status: String,
}

/// Durable table of `(channel, server)` deployment rows: which server has
/// each channel deployed right now, as reported by deploy/undeploy calls on
/// that server. Backed by Postgres so every instance can resolve ownership,
/// not just the one that deployed the channel.
pub struct ChannelRegistry {
    pool: PgPool,
}

impl ChannelRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> EngineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS d_channel_registry (
                channel_id TEXT PRIMARY KEY,
                server_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_owner(&self, channel_id: &str, server_id: &str) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO d_channel_registry (channel_id, server_id)
            VALUES ($1, $2)
            ON CONFLICT (channel_id) DO UPDATE SET server_id = EXCLUDED.server_id
            "#,
        )
        .bind(channel_id)
        .bind(server_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_owner(&self, channel_id: &str) -> EngineResult<()> {
        sqlx::query("DELETE FROM d_channel_registry WHERE channel_id = $1")
            .bind(channel_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn owner_of(&self, channel_id: &str) -> EngineResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT server_id FROM d_channel_registry WHERE channel_id = $1")
                .bind(channel_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(server_id,)| server_id))
    }
}

/// Posts a raw message to a peer instance's dispatch endpoint, authenticated
/// with a shared `X-Cluster-Secret` header.
pub struct RemoteDispatcher {
    client: Client,
    secret: Option<String>,
}

impl RemoteDispatcher {
    pub fn new(secret: Option<String>, timeout: Duration) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Internal(format!("building HTTP client: {e}")))?;
        Ok(Self { client, secret })
    }

    /// Dispatches `raw_message` to `channel_id` on the peer reachable at
    /// `api_url`. The peer is expected to expose
    /// `POST {api_url}/api/internal/dispatch` accepting
    /// `{channelId, rawData, sourceMap?}` and returning `{messageId, status}`.
    pub async fn dispatch(
        &self,
        api_url: &str,
        channel_id: &str,
        raw_message: &[u8],
        source_map: Option<&serde_json::Value>,
    ) -> EngineResult<i64> {
        let url = format!("{}/api/internal/dispatch", api_url.trim_end_matches('/'));
        let raw_data = String::from_utf8_lossy(raw_message);
        let body = DispatchRequest {
            channel_id,
            raw_data: &raw_data,
            source_map,
        };
        let mut request = self.client.post(&url).json(&body);
        if let Some(secret) = &self.secret {
            request = request.header(CLUSTER_SECRET_HEADER, secret);
        }

        let timer = DISPATCH_DURATION_SECONDS.start_timer();
        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Transient(format!("remote dispatch to '{url}' failed: {e}")));
        timer.observe_duration();
        let response = response?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(EngineError::Auth(format!(
                "remote dispatch to '{url}' rejected credentials"
            )));
        }
        if !response.status().is_success() {
            return Err(EngineError::Transient(format!(
                "remote dispatch to '{url}' returned status {}",
                response.status()
            )));
        }

        let parsed: DispatchResponse = response.json().await.map_err(|e| {
            EngineError::Transient(format!("remote dispatch to '{url}' returned malformed body: {e}"))
        })?;
        Ok(parsed.message_id)
    }

    /// Validates an inbound dispatch request's shared-secret header against
    /// this instance's configured secret. `None` configured secret means
    /// cluster auth is disabled and every request is accepted.
    pub fn authenticate(&self, header_value: Option<&str>) -> EngineResult<()> {
        match &self.secret {
            None => Ok(()),
            Some(expected) => match header_value {
                Some(actual) if actual == expected => Ok(()),
                _ => Err(EngineError::Auth(format!(
                    "missing or incorrect {CLUSTER_SECRET_HEADER} header"
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticate_accepts_matching_secret() {
        let dispatcher = RemoteDispatcher::new(Some("s3cr3t".into()), Duration::from_secs(5)).unwrap();
        assert!(dispatcher.authenticate(Some("s3cr3t")).is_ok());
        assert!(dispatcher.authenticate(Some("wrong")).is_err());
        assert!(dispatcher.authenticate(None).is_err());
    }

    #[test]
    fn authenticate_open_when_no_secret_configured() {
        let dispatcher = RemoteDispatcher::new(None, Duration::from_secs(5)).unwrap();
        assert!(dispatcher.authenticate(None).is_ok());
        assert!(dispatcher.authenticate(Some("anything")).is_ok());
    }
}
