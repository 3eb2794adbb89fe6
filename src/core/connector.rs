// src/core/connector.rs

//! External collaborator interfaces (§6 "external interfaces"). The engine
//! defines these traits and drives them from the Channel Runtime; it does
//! not ship concrete source/destination implementations (HL7 MLLP, file
//! readers, database writers, etc.) beyond what's needed for tests — those
//! are provided by the embedding application.

use async_trait::async_trait;
use serde_json::Value;

use crate::core::error::EngineResult;

/// A raw inbound message plus whatever transport-level metadata the source
/// connector captured (used to populate `sourceMap`, content-type `SourceMap`).
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub raw: Vec<u8>,
    pub data_type: Option<String>,
    pub source_map: Value,
}

/// Produces inbound messages for a channel: a listener, a poller, or a
/// one-shot injector (`dispatchRawMessage`).
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Polling sources return the next available message, or `None` if
    /// nothing is ready; listening sources never call this.
    async fn poll(&self) -> EngineResult<Option<InboundMessage>>;
}

/// An outcome handed back by a destination connector after attempting to
/// send a transformed, encoded message.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub response: Option<Vec<u8>>,
    pub response_data_type: Option<String>,
}

/// Sends one encoded message to an external system.
#[async_trait]
pub trait DestinationConnector: Send + Sync {
    async fn send(&self, encoded: &[u8], data_type: Option<&str>) -> EngineResult<SendOutcome>;
}

/// Converts between a connector's wire format and the engine's in-memory
/// transformation representation. `serialize`/`deserialize` round-trip
/// through the same `data_type` tag stored alongside content rows.
pub trait DataTypeCodec: Send + Sync {
    fn data_type(&self) -> &str;
    fn deserialize(&self, raw: &[u8]) -> EngineResult<Value>;
    fn serialize(&self, value: &Value) -> EngineResult<Vec<u8>>;
}

/// Synthesizes an acknowledgement to send back to the originating system
/// (e.g. an HL7 ACK) once a message has been processed.
#[async_trait]
pub trait AutoResponder: Send + Sync {
    async fn build_response(&self, outcome: &ProcessingOutcome) -> EngineResult<Vec<u8>>;
}

/// The terminal disposition of a message after all destinations have run,
/// as seen by the auto-responder and by any post-processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Sent,
    Filtered,
    Error,
}

/// Inspects a destination's response and decides whether it should be
/// treated as success, a retryable failure, or a terminal error (§5 class 5).
#[async_trait]
pub trait ResponseValidator: Send + Sync {
    async fn validate(&self, response: &SendOutcome) -> EngineResult<()>;
}

/// Extracts attachment payloads from a raw message, replacing each occurrence
/// inline with `${ATTACH:<id>}` (see `store::model::attachment_token`).
pub trait AttachmentHandler: Send + Sync {
    fn extract(&self, raw: &[u8]) -> EngineResult<(Vec<u8>, Vec<(String, Vec<u8>)>)>;

    /// Reverses `extract`: substitutes attachment tokens back with their
    /// stored bytes before a destination sends the message onward.
    fn reattach(&self, raw: &[u8], attachments: &[(String, Vec<u8>)]) -> EngineResult<Vec<u8>>;
}

/// Splits one inbound transport payload into the individual messages it
/// contains (e.g. a batched HL7 file). A non-batch source's adaptor returns
/// a single-element vector.
pub trait BatchAdaptor: Send + Sync {
    fn split(&self, raw: &[u8]) -> EngineResult<Vec<Vec<u8>>>;
}

/// Authorizes a polling cycle for a channel's source connector, checked by
/// the Channel Runtime immediately before each poll. A cluster deployment
/// composes the Mode Controller (C7) and Polling Lease Manager (C5) behind
/// this trait; `AlwaysAuthorized` is used for a single-instance deployment
/// or in tests.
#[async_trait]
pub trait PollAuthority: Send + Sync {
    async fn authorize(&self, channel_id: &str) -> EngineResult<bool>;
}

/// Grants unconditional polling permission.
pub struct AlwaysAuthorized;

#[async_trait]
impl PollAuthority for AlwaysAuthorized {
    async fn authorize(&self, _channel_id: &str) -> EngineResult<bool> {
        Ok(true)
    }
}
