// src/core/store/mod.rs

//! Message Store (C3): the durable record of messages, connector-level
//! processing state, content payloads, attachments, and per-channel
//! statistics.

pub mod encryption;
pub mod model;
pub mod postgres;
pub mod traits;

pub use encryption::{Encryptor, NoopEncryptor};
pub use model::{
    attachment_token, AttachmentRow, ConnectorMessage, ConnectorStatus, ContentRow, ContentType,
    CustomMetadata, Message, StatKind,
};
pub use postgres::PgMessageStore;
pub use traits::{MessageFilter, MessageStore, PageRange};
