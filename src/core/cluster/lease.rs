// src/core/cluster/lease.rs

//! Polling Lease Manager (C5): arbitrates which instance polls a given
//! `(channel, connector)` pair when the cluster is configured for exclusive
//! polling.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::core::error::EngineResult;
use crate::core::metrics::{LEASES_HELD, LEASES_LOST_TOTAL};

/// Claims and renews polling leases in `d_polling_lease`. A lease is a row
/// keyed by `(channel_id, metadata_id)` owned by one `server_id` until it
/// expires or is explicitly released.
///
/// `held` mirrors, in memory, the set of leases this instance currently
/// believes it owns, purely so the `engine_leases_held` gauge reflects a net
/// count rather than incrementing on every renewal.
pub struct LeaseManager {
    pool: PgPool,
    server_id: String,
    ttl: Duration,
    held: Mutex<HashSet<(String, i32)>>,
}

impl LeaseManager {
    pub fn new(pool: PgPool, server_id: String, ttl: Duration) -> Self {
        Self {
            pool,
            server_id,
            ttl,
            held: Mutex::new(HashSet::new()),
        }
    }

    pub async fn ensure_schema(&self) -> EngineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS d_polling_lease (
                channel_id TEXT NOT NULL,
                metadata_id INT NOT NULL,
                owner_server_id TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (channel_id, metadata_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Attempts to claim or renew the lease for `(channel_id, metadata_id)`.
    /// Succeeds if the row is absent, expired, or already owned by this
    /// server; fails (without erroring) if another live server holds it.
    pub async fn acquire(&self, channel_id: &str, metadata_id: i32) -> EngineResult<bool> {
        let expires_at = Utc::now() + chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));

        let result = sqlx::query(
            r#"
            INSERT INTO d_polling_lease (channel_id, metadata_id, owner_server_id, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (channel_id, metadata_id) DO UPDATE SET
                owner_server_id = EXCLUDED.owner_server_id,
                expires_at = EXCLUDED.expires_at
            WHERE d_polling_lease.owner_server_id = $3 OR d_polling_lease.expires_at < now()
            "#,
        )
        .bind(channel_id)
        .bind(metadata_id)
        .bind(&self.server_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        let acquired = result.rows_affected() > 0;
        if acquired {
            let mut held = self.held.lock().await;
            if held.insert((channel_id.to_string(), metadata_id)) {
                LEASES_HELD.inc();
            }
        }
        Ok(acquired)
    }

    /// Releases a held lease early, e.g. when a channel is stopped.
    pub async fn release(&self, channel_id: &str, metadata_id: i32) -> EngineResult<()> {
        sqlx::query(
            "DELETE FROM d_polling_lease WHERE channel_id = $1 AND metadata_id = $2 AND owner_server_id = $3",
        )
        .bind(channel_id)
        .bind(metadata_id)
        .bind(&self.server_id)
        .execute(&self.pool)
        .await?;

        let mut held = self.held.lock().await;
        if held.remove(&(channel_id.to_string(), metadata_id)) {
            LEASES_HELD.dec();
        }
        Ok(())
    }

    /// Verifies this server still holds the lease, recording a loss if not.
    /// Destination/source poll loops call this before and after a long poll
    /// to detect a lease that expired mid-flight.
    pub async fn still_held(&self, channel_id: &str, metadata_id: i32) -> EngineResult<bool> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT owner_server_id FROM d_polling_lease WHERE channel_id = $1 AND metadata_id = $2 AND expires_at >= now()",
        )
        .bind(channel_id)
        .bind(metadata_id)
        .fetch_optional(&self.pool)
        .await?;

        let held = matches!(row, Some((owner,)) if owner == self.server_id);
        if !held {
            let mut held_set = self.held.lock().await;
            if held_set.remove(&(channel_id.to_string(), metadata_id)) {
                LEASES_HELD.dec();
            }
            LEASES_LOST_TOTAL.inc();
        }
        Ok(held)
    }
}
