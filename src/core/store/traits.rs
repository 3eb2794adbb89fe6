// src/core/store/traits.rs

//! The `MessageStore` contract (C3). A trait rather than a concrete struct
//! so the Channel Runtime and Engine Controller can be exercised in tests
//! against an in-memory fake, and so the Postgres-backed implementation is
//! swappable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::error::EngineResult;
use crate::core::store::model::{
    AttachmentRow, ConnectorMessage, ConnectorStatus, ContentRow, ContentType, Message, StatKind,
};

/// A filter over messages for `search`/`countByFilter`. All fields are
/// conjunctive (AND'd together); `None` means "no constraint".
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub correlation_id: Option<String>,
    pub status: Option<ConnectorStatus>,
    pub received_after: Option<DateTime<Utc>>,
    pub received_before: Option<DateTime<Utc>>,
}

/// A page range for `search`.
#[derive(Debug, Clone, Copy)]
pub struct PageRange {
    pub offset: i64,
    pub limit: i64,
}

impl Default for PageRange {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// `createMessage(channel, msgId, serverId)` — one row per message.
    async fn create_message(
        &self,
        channel_id: &str,
        message_id: i64,
        server_id: &str,
        batch_sequence_id: Option<i64>,
    ) -> EngineResult<()>;

    /// `upsertConnectorMessage`. Status monotonicity is enforced by the
    /// Channel Runtime, not the store.
    async fn upsert_connector_message(&self, cm: &ConnectorMessage) -> EngineResult<()>;

    async fn get_connector_message(
        &self,
        channel_id: &str,
        message_id: i64,
        metadata_id: i32,
    ) -> EngineResult<Option<ConnectorMessage>>;

    /// `putContent`. A write to the same `(message, connector, contentType)`
    /// key replaces the prior row.
    async fn put_content(&self, row: &ContentRow) -> EngineResult<()>;

    /// `getContent`.
    async fn get_content(
        &self,
        channel_id: &str,
        message_id: i64,
        metadata_id: i32,
        content_type: ContentType,
    ) -> EngineResult<Option<ContentRow>>;

    /// All content rows for one connector-message, used by bulk encrypt/decrypt.
    async fn list_content(
        &self,
        channel_id: &str,
        message_id: i64,
        metadata_id: i32,
    ) -> EngineResult<Vec<ContentRow>>;

    /// `putAttachment` — append-only.
    async fn put_attachment(&self, row: &AttachmentRow) -> EngineResult<()>;

    async fn get_attachment(
        &self,
        channel_id: &str,
        message_id: i64,
        attachment_id: &str,
    ) -> EngineResult<Option<AttachmentRow>>;

    /// `incStats`.
    async fn inc_stats(&self, channel_id: &str, metadata_id: i32, kind: StatKind) -> EngineResult<()>;

    /// `search`.
    async fn search(
        &self,
        channel_id: &str,
        filter: &MessageFilter,
        range: PageRange,
    ) -> EngineResult<Vec<Message>>;

    /// `countByFilter`.
    async fn count_by_filter(&self, channel_id: &str, filter: &MessageFilter) -> EngineResult<i64>;
}
