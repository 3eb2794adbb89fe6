// src/core/store/postgres.rs

//! Postgres-backed `MessageStore`. Uses runtime-checked `sqlx::query`/
//! `query_as` (never the `query!`/`query_as!` macros, which require a live
//! database connection at compile time) so the crate builds without a
//! reachable database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::core::error::{EngineError, EngineResult};
use crate::core::store::model::{
    AttachmentRow, ConnectorMessage, ConnectorStatus, ContentRow, ContentType, Message, StatKind,
};
use crate::core::store::traits::{MessageFilter, MessageStore, PageRange};

/// A `MessageStore` backed by a Postgres connection pool.
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the DDL for the tables this store owns. Idempotent
    /// (`CREATE TABLE IF NOT EXISTS`); called once at startup.
    pub async fn ensure_schema(&self) -> EngineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS d_message (
                channel_id TEXT NOT NULL,
                message_id BIGINT NOT NULL,
                server_id TEXT NOT NULL,
                received_at TIMESTAMPTZ NOT NULL,
                processed BOOLEAN NOT NULL DEFAULT FALSE,
                correlation_id TEXT,
                batch_sequence_id BIGINT,
                PRIMARY KEY (channel_id, message_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS d_connector_message (
                channel_id TEXT NOT NULL,
                message_id BIGINT NOT NULL,
                metadata_id INT NOT NULL,
                status TEXT NOT NULL,
                send_attempts INT NOT NULL DEFAULT 0,
                error TEXT,
                received_at TIMESTAMPTZ,
                sent_at TIMESTAMPTZ,
                source_map JSONB,
                PRIMARY KEY (channel_id, message_id, metadata_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS d_message_content (
                channel_id TEXT NOT NULL,
                message_id BIGINT NOT NULL,
                metadata_id INT NOT NULL,
                content_type SMALLINT NOT NULL,
                payload BYTEA NOT NULL,
                data_type TEXT,
                encrypted BOOLEAN NOT NULL DEFAULT FALSE,
                PRIMARY KEY (channel_id, message_id, metadata_id, content_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS d_attachment (
                channel_id TEXT NOT NULL,
                message_id BIGINT NOT NULL,
                attachment_id TEXT NOT NULL,
                content_type TEXT NOT NULL,
                data BYTEA NOT NULL,
                PRIMARY KEY (channel_id, message_id, attachment_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS d_message_stats (
                channel_id TEXT NOT NULL,
                metadata_id INT NOT NULL,
                received BIGINT NOT NULL DEFAULT 0,
                sent BIGINT NOT NULL DEFAULT 0,
                filtered BIGINT NOT NULL DEFAULT 0,
                error BIGINT NOT NULL DEFAULT 0,
                queued BIGINT NOT NULL DEFAULT 0,
                pending BIGINT NOT NULL DEFAULT 0,
                PRIMARY KEY (channel_id, metadata_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_message(row: &sqlx::postgres::PgRow) -> Message {
    Message {
        channel_id: row.get("channel_id"),
        message_id: row.get("message_id"),
        server_id: row.get("server_id"),
        received_at: row.get("received_at"),
        processed: row.get("processed"),
        correlation_id: row.get("correlation_id"),
        batch_sequence_id: row.get("batch_sequence_id"),
    }
}

fn row_to_connector_message(row: &sqlx::postgres::PgRow) -> EngineResult<ConnectorMessage> {
    let status_str: String = row.get("status");
    let status = ConnectorStatus::from_str(&status_str)
        .ok_or_else(|| EngineError::Internal(format!("unknown connector status '{status_str}'")))?;
    Ok(ConnectorMessage {
        channel_id: row.get("channel_id"),
        message_id: row.get("message_id"),
        metadata_id: row.get("metadata_id"),
        status,
        send_attempts: row.get("send_attempts"),
        error: row.get("error"),
        received_at: row.get::<Option<DateTime<Utc>>, _>("received_at"),
        sent_at: row.get::<Option<DateTime<Utc>>, _>("sent_at"),
        source_map: row.get("source_map"),
    })
}

fn row_to_content(row: &sqlx::postgres::PgRow) -> EngineResult<ContentRow> {
    let content_type_raw: i16 = row.get("content_type");
    let content_type = ContentType::from_i16(content_type_raw).ok_or_else(|| {
        EngineError::Internal(format!("unknown content type id {content_type_raw}"))
    })?;
    Ok(ContentRow {
        channel_id: row.get("channel_id"),
        message_id: row.get("message_id"),
        metadata_id: row.get("metadata_id"),
        content_type,
        payload: row.get("payload"),
        data_type: row.get("data_type"),
        encrypted: row.get("encrypted"),
    })
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn create_message(
        &self,
        channel_id: &str,
        message_id: i64,
        server_id: &str,
        batch_sequence_id: Option<i64>,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO d_message (channel_id, message_id, server_id, received_at, processed, batch_sequence_id)
            VALUES ($1, $2, $3, now(), FALSE, $4)
            "#,
        )
        .bind(channel_id)
        .bind(message_id)
        .bind(server_id)
        .bind(batch_sequence_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_connector_message(&self, cm: &ConnectorMessage) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO d_connector_message
                (channel_id, message_id, metadata_id, status, send_attempts, error, received_at, sent_at, source_map)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (channel_id, message_id, metadata_id) DO UPDATE SET
                status = EXCLUDED.status,
                send_attempts = EXCLUDED.send_attempts,
                error = EXCLUDED.error,
                received_at = COALESCE(EXCLUDED.received_at, d_connector_message.received_at),
                sent_at = COALESCE(EXCLUDED.sent_at, d_connector_message.sent_at),
                source_map = COALESCE(EXCLUDED.source_map, d_connector_message.source_map)
            "#,
        )
        .bind(&cm.channel_id)
        .bind(cm.message_id)
        .bind(cm.metadata_id)
        .bind(cm.status.as_str())
        .bind(cm.send_attempts)
        .bind(&cm.error)
        .bind(cm.received_at)
        .bind(cm.sent_at)
        .bind(&cm.source_map)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_connector_message(
        &self,
        channel_id: &str,
        message_id: i64,
        metadata_id: i32,
    ) -> EngineResult<Option<ConnectorMessage>> {
        let row = sqlx::query(
            "SELECT * FROM d_connector_message WHERE channel_id = $1 AND message_id = $2 AND metadata_id = $3",
        )
        .bind(channel_id)
        .bind(message_id)
        .bind(metadata_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| row_to_connector_message(&r)).transpose()
    }

    async fn put_content(&self, row: &ContentRow) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO d_message_content
                (channel_id, message_id, metadata_id, content_type, payload, data_type, encrypted)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (channel_id, message_id, metadata_id, content_type) DO UPDATE SET
                payload = EXCLUDED.payload,
                data_type = EXCLUDED.data_type,
                encrypted = EXCLUDED.encrypted
            "#,
        )
        .bind(&row.channel_id)
        .bind(row.message_id)
        .bind(row.metadata_id)
        .bind(row.content_type.as_i16())
        .bind(&row.payload)
        .bind(&row.data_type)
        .bind(row.encrypted)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_content(
        &self,
        channel_id: &str,
        message_id: i64,
        metadata_id: i32,
        content_type: ContentType,
    ) -> EngineResult<Option<ContentRow>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM d_message_content
            WHERE channel_id = $1 AND message_id = $2 AND metadata_id = $3 AND content_type = $4
            "#,
        )
        .bind(channel_id)
        .bind(message_id)
        .bind(metadata_id)
        .bind(content_type.as_i16())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| row_to_content(&r)).transpose()
    }

    async fn list_content(
        &self,
        channel_id: &str,
        message_id: i64,
        metadata_id: i32,
    ) -> EngineResult<Vec<ContentRow>> {
        let rows = sqlx::query(
            "SELECT * FROM d_message_content WHERE channel_id = $1 AND message_id = $2 AND metadata_id = $3",
        )
        .bind(channel_id)
        .bind(message_id)
        .bind(metadata_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_content).collect()
    }

    async fn put_attachment(&self, row: &AttachmentRow) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO d_attachment (channel_id, message_id, attachment_id, content_type, data)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (channel_id, message_id, attachment_id) DO NOTHING
            "#,
        )
        .bind(&row.channel_id)
        .bind(row.message_id)
        .bind(&row.attachment_id)
        .bind(&row.content_type)
        .bind(&row.data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_attachment(
        &self,
        channel_id: &str,
        message_id: i64,
        attachment_id: &str,
    ) -> EngineResult<Option<AttachmentRow>> {
        let row = sqlx::query(
            "SELECT * FROM d_attachment WHERE channel_id = $1 AND message_id = $2 AND attachment_id = $3",
        )
        .bind(channel_id)
        .bind(message_id)
        .bind(attachment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| AttachmentRow {
            channel_id: r.get("channel_id"),
            message_id: r.get("message_id"),
            attachment_id: r.get("attachment_id"),
            content_type: r.get("content_type"),
            data: r.get("data"),
        }))
    }

    async fn inc_stats(&self, channel_id: &str, metadata_id: i32, kind: StatKind) -> EngineResult<()> {
        let column = match kind {
            StatKind::Received => "received",
            StatKind::Sent => "sent",
            StatKind::Filtered => "filtered",
            StatKind::Error => "error",
            StatKind::Queued => "queued",
            StatKind::Pending => "pending",
        };
        let sql = format!(
            r#"
            INSERT INTO d_message_stats (channel_id, metadata_id, {column})
            VALUES ($1, $2, 1)
            ON CONFLICT (channel_id, metadata_id) DO UPDATE SET {column} = d_message_stats.{column} + 1
            "#
        );
        sqlx::query(&sql)
            .bind(channel_id)
            .bind(metadata_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        channel_id: &str,
        filter: &MessageFilter,
        range: PageRange,
    ) -> EngineResult<Vec<Message>> {
        // A fixed WHERE clause built from the always-present channel_id plus
        // the optional filter fields, each appended only when set. `status`
        // lives on the source connector-message (metadata_id 0), not on
        // d_message itself, so it is applied via an EXISTS subquery.
        let mut sql = String::from("SELECT * FROM d_message WHERE channel_id = $1");
        let mut idx = 2;
        if filter.correlation_id.is_some() {
            sql.push_str(&format!(" AND correlation_id = ${idx}"));
            idx += 1;
        }
        if filter.received_after.is_some() {
            sql.push_str(&format!(" AND received_at >= ${idx}"));
            idx += 1;
        }
        if filter.received_before.is_some() {
            sql.push_str(&format!(" AND received_at <= ${idx}"));
            idx += 1;
        }
        if filter.status.is_some() {
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM d_connector_message cm \
                   WHERE cm.channel_id = d_message.channel_id \
                   AND cm.message_id = d_message.message_id \
                   AND cm.metadata_id = 0 AND cm.status = ${idx})"
            ));
            idx += 1;
        }
        sql.push_str(" ORDER BY message_id ASC OFFSET $");
        sql.push_str(&idx.to_string());
        idx += 1;
        sql.push_str(" LIMIT $");
        sql.push_str(&idx.to_string());

        let mut query = sqlx::query(&sql).bind(channel_id);
        if let Some(c) = &filter.correlation_id {
            query = query.bind(c);
        }
        if let Some(a) = filter.received_after {
            query = query.bind(a);
        }
        if let Some(b) = filter.received_before {
            query = query.bind(b);
        }
        if let Some(s) = filter.status {
            query = query.bind(s.as_str());
        }
        query = query.bind(range.offset).bind(range.limit);

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_message).collect())
    }

    async fn count_by_filter(&self, channel_id: &str, filter: &MessageFilter) -> EngineResult<i64> {
        let mut sql = String::from("SELECT count(*) AS n FROM d_message WHERE channel_id = $1");
        let mut idx = 2;
        if filter.correlation_id.is_some() {
            sql.push_str(&format!(" AND correlation_id = ${idx}"));
            idx += 1;
        }
        if filter.received_after.is_some() {
            sql.push_str(&format!(" AND received_at >= ${idx}"));
            idx += 1;
        }
        if filter.received_before.is_some() {
            sql.push_str(&format!(" AND received_at <= ${idx}"));
            idx += 1;
        }
        if filter.status.is_some() {
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM d_connector_message cm \
                   WHERE cm.channel_id = d_message.channel_id \
                   AND cm.message_id = d_message.message_id \
                   AND cm.metadata_id = 0 AND cm.status = ${idx})"
            ));
        }

        let mut query = sqlx::query(&sql).bind(channel_id);
        if let Some(c) = &filter.correlation_id {
            query = query.bind(c);
        }
        if let Some(a) = filter.received_after {
            query = query.bind(a);
        }
        if let Some(b) = filter.received_before {
            query = query.bind(b);
        }
        if let Some(s) = filter.status {
            query = query.bind(s.as_str());
        }
        let row = query.fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>("n"))
    }
}
