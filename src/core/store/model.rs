// src/core/store/model.rs

//! Durable entities of the Message Store (C3): messages, per-connector
//! sub-records, content rows, attachments, and custom metadata.
//!
//! The integer content-type ids and the `mirth_*` custom-metadata column
//! names are wire-level compatible with a peer system sharing the same
//! database in shadow/takeover mode (§9) and must never be renamed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the fourteen stages at which content may be captured for a
/// connector-message. The discriminant values are the exact integer ids
/// persisted in the database; renaming or renumbering breaks peer
/// interoperability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum ContentType {
    Raw = 1,
    ProcessedRaw = 2,
    Transformed = 3,
    Encoded = 4,
    Sent = 5,
    Response = 6,
    ResponseTransformed = 7,
    ProcessedResponse = 8,
    ConnectorMap = 9,
    ChannelMap = 10,
    ResponseMap = 11,
    ProcessingError = 12,
    PostprocessorError = 13,
    SourceMap = 14,
}

impl ContentType {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(v: i16) -> Option<Self> {
        Some(match v {
            1 => Self::Raw,
            2 => Self::ProcessedRaw,
            3 => Self::Transformed,
            4 => Self::Encoded,
            5 => Self::Sent,
            6 => Self::Response,
            7 => Self::ResponseTransformed,
            8 => Self::ProcessedResponse,
            9 => Self::ConnectorMap,
            10 => Self::ChannelMap,
            11 => Self::ResponseMap,
            12 => Self::ProcessingError,
            13 => Self::PostprocessorError,
            14 => Self::SourceMap,
            _ => return None,
        })
    }
}

/// Processing status of a connector-message. A destination connector-message
/// moves through this lattice at most once except via explicit retry/reprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectorStatus {
    Received,
    Filtered,
    Transformed,
    Queued,
    Sent,
    Error,
    Pending,
}

impl ConnectorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Filtered => "FILTERED",
            Self::Transformed => "TRANSFORMED",
            Self::Queued => "QUEUED",
            Self::Sent => "SENT",
            Self::Error => "ERROR",
            Self::Pending => "PENDING",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "RECEIVED" => Self::Received,
            "FILTERED" => Self::Filtered,
            "TRANSFORMED" => Self::Transformed,
            "QUEUED" => Self::Queued,
            "SENT" => Self::Sent,
            "ERROR" => Self::Error,
            "PENDING" => Self::Pending,
            _ => return None,
        })
    }

    /// Whether this is a terminal outcome for the current pipeline run (no
    /// further automatic transition except via a scheduled retry).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Filtered | Self::Error)
    }
}

/// Source-of-record for statistics increments (§4.3 `incStats`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Received,
    Sent,
    Filtered,
    Error,
    Queued,
    Pending,
}

/// A message: the per-channel, monotonically identified unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub channel_id: String,
    pub message_id: i64,
    pub server_id: String,
    pub received_at: DateTime<Utc>,
    pub processed: bool,
    pub correlation_id: Option<String>,
    /// Batch sequence id, set when the source used a batch adaptor (§4.8).
    pub batch_sequence_id: Option<i64>,
}

/// The per-connector record of a message's processing. `metadata_id` 0 is
/// the source; 1..N are destinations in configured order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorMessage {
    pub channel_id: String,
    pub message_id: i64,
    pub metadata_id: i32,
    pub status: ConnectorStatus,
    pub send_attempts: i32,
    pub error: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub source_map: Option<serde_json::Value>,
}

impl ConnectorMessage {
    pub fn new_received(channel_id: &str, message_id: i64, metadata_id: i32) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            message_id,
            metadata_id,
            status: ConnectorStatus::Received,
            send_attempts: 0,
            error: None,
            received_at: Some(Utc::now()),
            sent_at: None,
            source_map: None,
        }
    }
}

/// A content row: one payload for `(message, connector, content_type)`. A
/// subsequent write to the same key replaces the prior row (last-writer-wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRow {
    pub channel_id: String,
    pub message_id: i64,
    pub metadata_id: i32,
    pub content_type: ContentType,
    pub payload: Vec<u8>,
    pub data_type: Option<String>,
    pub encrypted: bool,
}

/// An attachment row. Inline raw content may reference it via the token
/// `${ATTACH:<id>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRow {
    pub channel_id: String,
    pub message_id: i64,
    pub attachment_id: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// The attachment-token substring used to replace inline attachment bytes.
pub fn attachment_token(attachment_id: &str) -> String {
    format!("${{ATTACH:{attachment_id}}}")
}

/// Custom-metadata row. The three well-known columns are wire-compatible
/// with the peer (Java) system; never rename them (§9).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CustomMetadata {
    pub mirth_source: Option<String>,
    pub mirth_type: Option<String>,
    pub mirth_version: Option<String>,
    pub variables: std::collections::BTreeMap<String, String>,
}
