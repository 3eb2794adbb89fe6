// src/core/cluster/registry.rs

//! Server Registry & Quorum (C4): who else is in the cluster, whether they
//! are alive, and whether a quorum of the cluster is currently reachable.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::core::error::EngineResult;
use crate::core::metrics::{CLUSTER_ALIVE_SERVERS, CLUSTER_HAS_QUORUM, CLUSTER_TOTAL_SERVERS};

/// A server's participation state in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// Fully participating: eligible to hold leases and receive dispatches.
    Online,
    /// Present but not yet eligible to poll or be dispatched to (§7).
    Shadow,
    /// Administratively removed; excluded from alive/quorum accounting.
    Offline,
}

impl ServerStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Online => "ONLINE",
            Self::Shadow => "SHADOW",
            Self::Offline => "OFFLINE",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "SHADOW" => Self::Shadow,
            "OFFLINE" => Self::Offline,
            _ => Self::Online,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerRecord {
    pub server_id: String,
    pub hostname: Option<String>,
    pub port: Option<i32>,
    pub api_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub status: ServerStatus,
    pub last_heartbeat: DateTime<Utc>,
}

/// Tracks cluster membership in `d_servers` and answers alive/quorum queries.
pub struct ServerRegistry {
    pool: PgPool,
    heartbeat_timeout: Duration,
}

impl ServerRegistry {
    pub fn new(pool: PgPool, heartbeat_timeout: Duration) -> Self {
        Self {
            pool,
            heartbeat_timeout,
        }
    }

    pub async fn ensure_schema(&self) -> EngineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS d_servers (
                server_id TEXT PRIMARY KEY,
                hostname TEXT,
                port INTEGER,
                api_url TEXT,
                status TEXT NOT NULL DEFAULT 'ONLINE',
                started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                last_heartbeat TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS d_sequence (
                channel_id TEXT PRIMARY KEY,
                next_id BIGINT NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records a heartbeat for this server, registering it if unseen.
    /// `started_at` is set only on the first insert; later heartbeats leave
    /// it untouched.
    pub async fn heartbeat(
        &self,
        server_id: &str,
        hostname: Option<&str>,
        port: Option<i32>,
        api_url: Option<&str>,
        status: ServerStatus,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO d_servers (server_id, hostname, port, api_url, status, started_at, last_heartbeat)
            VALUES ($1, $2, $3, $4, $5, now(), now())
            ON CONFLICT (server_id) DO UPDATE SET
                hostname = EXCLUDED.hostname,
                port = EXCLUDED.port,
                api_url = EXCLUDED.api_url,
                status = EXCLUDED.status,
                last_heartbeat = now()
            "#,
        )
        .bind(server_id)
        .bind(hostname)
        .bind(port)
        .bind(api_url)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All servers not marked `OFFLINE`, regardless of heartbeat recency.
    pub async fn known_servers(&self) -> EngineResult<Vec<ServerRecord>> {
        let rows: Vec<(String, Option<String>, Option<i32>, Option<String>, String, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT server_id, hostname, port, api_url, status, started_at, last_heartbeat FROM d_servers WHERE status != 'OFFLINE'",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(server_id, hostname, port, api_url, status, started_at, last_heartbeat)| ServerRecord {
                server_id,
                hostname,
                port,
                api_url,
                started_at,
                status: ServerStatus::from_str(&status),
                last_heartbeat,
            })
            .collect())
    }

    /// Servers whose last heartbeat is within `heartbeat_timeout`.
    pub async fn alive_servers(&self) -> EngineResult<Vec<ServerRecord>> {
        let cutoff = self.heartbeat_cutoff();
        Ok(self
            .known_servers()
            .await?
            .into_iter()
            .filter(|s| s.last_heartbeat >= cutoff)
            .collect())
    }

    fn heartbeat_cutoff(&self) -> DateTime<Utc> {
        Utc::now() - chrono::Duration::from_std(self.heartbeat_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(15))
    }

    /// `isAlive(id)`: the server is `ONLINE` and its last heartbeat is
    /// within `heartbeat_timeout`.
    pub async fn is_alive(&self, server_id: &str) -> EngineResult<bool> {
        Ok(self
            .alive_servers()
            .await?
            .iter()
            .any(|s| s.server_id == server_id && s.status == ServerStatus::Online))
    }

    /// `offlineNodes()`: servers still marked `ONLINE` whose heartbeat has
    /// gone stale, as distinct from servers administratively set `OFFLINE`
    /// (already excluded from `known_servers`).
    pub async fn offline_nodes(&self) -> EngineResult<Vec<ServerRecord>> {
        let cutoff = self.heartbeat_cutoff();
        Ok(self
            .known_servers()
            .await?
            .into_iter()
            .filter(|s| s.status == ServerStatus::Online && s.last_heartbeat < cutoff)
            .collect())
    }

    /// Refreshes the cluster gauges and returns whether a majority
    /// (`ceil(total/2)`) of known servers are currently alive.
    pub async fn has_quorum(&self) -> EngineResult<bool> {
        let known = self.known_servers().await?;
        let total = known.len();
        let alive = self.alive_servers().await?.len();

        CLUSTER_TOTAL_SERVERS.set(total as f64);
        CLUSTER_ALIVE_SERVERS.set(alive as f64);

        let min_required = total.div_ceil(2).max(1);
        let quorum = total == 0 || alive >= min_required;
        CLUSTER_HAS_QUORUM.set(if quorum { 1.0 } else { 0.0 });
        Ok(quorum)
    }
}
