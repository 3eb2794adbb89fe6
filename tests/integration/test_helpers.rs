// tests/integration/test_helpers.rs

//! Test fixtures exercising the channel runtime end-to-end against
//! in-memory fakes instead of a live Postgres instance: a `MessageStore`
//! over a handful of `Mutex`-guarded maps, an `InMemorySequenceSource`, and
//! minimal `SourceConnector`/`DestinationConnector`/`AutoResponder`
//! implementations driven directly by test code rather than a real
//! transport.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use clinicmesh::core::channel::pipeline::{DestinationPipeline, SourcePipeline, Filter, Transformer, Passthrough};
use clinicmesh::core::channel::response::ResponseSelector;
use clinicmesh::core::channel::retry::RetryPolicy;
use clinicmesh::core::channel::runtime::{ChannelRuntime, DestinationRuntime};
use clinicmesh::core::channel::queue::DurableQueue;
use clinicmesh::core::connector::{
    AutoResponder, DestinationConnector, InboundMessage, PollAuthority, ProcessingOutcome, ResponseValidator,
    SendOutcome, SourceConnector,
};
use clinicmesh::core::error::{EngineError, EngineResult};
use clinicmesh::core::store::model::{
    AttachmentRow, ConnectorMessage, ConnectorStatus, ContentRow, ContentType, Message, StatKind,
};
use clinicmesh::core::store::traits::{MessageFilter, MessageStore, PageRange};
use serde_json::Value;
use tokio::sync::Mutex;

type ContentKey = (String, i64, i32, i16);
type ConnectorKey = (String, i64, i32);

/// A `MessageStore` over in-memory maps. Good enough to assert on
/// connector-message status, content rows, and stat counters without a
/// database round-trip.
#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: Mutex<Vec<Message>>,
    connector_messages: Mutex<HashMap<ConnectorKey, ConnectorMessage>>,
    content: Mutex<HashMap<ContentKey, ContentRow>>,
    attachments: Mutex<Vec<AttachmentRow>>,
    stats: Mutex<Vec<(String, i32, StatKind)>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connector_message(
        &self,
        channel_id: &str,
        message_id: i64,
        metadata_id: i32,
    ) -> Option<ConnectorMessage> {
        self.connector_messages
            .lock()
            .await
            .get(&(channel_id.to_string(), message_id, metadata_id))
            .cloned()
    }

    pub async fn stat_count(&self, channel_id: &str, metadata_id: i32, kind: StatKind) -> usize {
        self.stats
            .lock()
            .await
            .iter()
            .filter(|(c, m, k)| c == channel_id && *m == metadata_id && *k == kind)
            .count()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn create_message(
        &self,
        channel_id: &str,
        message_id: i64,
        server_id: &str,
        batch_sequence_id: Option<i64>,
    ) -> EngineResult<()> {
        self.messages.lock().await.push(Message {
            channel_id: channel_id.to_string(),
            message_id,
            server_id: server_id.to_string(),
            received_at: chrono::Utc::now(),
            processed: false,
            correlation_id: None,
            batch_sequence_id,
        });
        Ok(())
    }

    async fn upsert_connector_message(&self, cm: &ConnectorMessage) -> EngineResult<()> {
        self.connector_messages.lock().await.insert(
            (cm.channel_id.clone(), cm.message_id, cm.metadata_id),
            cm.clone(),
        );
        Ok(())
    }

    async fn get_connector_message(
        &self,
        channel_id: &str,
        message_id: i64,
        metadata_id: i32,
    ) -> EngineResult<Option<ConnectorMessage>> {
        Ok(self
            .connector_messages
            .lock()
            .await
            .get(&(channel_id.to_string(), message_id, metadata_id))
            .cloned())
    }

    async fn put_content(&self, row: &ContentRow) -> EngineResult<()> {
        self.content.lock().await.insert(
            (
                row.channel_id.clone(),
                row.message_id,
                row.metadata_id,
                row.content_type.as_i16(),
            ),
            row.clone(),
        );
        Ok(())
    }

    async fn get_content(
        &self,
        channel_id: &str,
        message_id: i64,
        metadata_id: i32,
        content_type: ContentType,
    ) -> EngineResult<Option<ContentRow>> {
        Ok(self
            .content
            .lock()
            .await
            .get(&(channel_id.to_string(), message_id, metadata_id, content_type.as_i16()))
            .cloned())
    }

    async fn list_content(
        &self,
        channel_id: &str,
        message_id: i64,
        metadata_id: i32,
    ) -> EngineResult<Vec<ContentRow>> {
        Ok(self
            .content
            .lock()
            .await
            .values()
            .filter(|r| r.channel_id == channel_id && r.message_id == message_id && r.metadata_id == metadata_id)
            .cloned()
            .collect())
    }

    async fn put_attachment(&self, row: &AttachmentRow) -> EngineResult<()> {
        self.attachments.lock().await.push(row.clone());
        Ok(())
    }

    async fn get_attachment(
        &self,
        channel_id: &str,
        message_id: i64,
        attachment_id: &str,
    ) -> EngineResult<Option<AttachmentRow>> {
        Ok(self
            .attachments
            .lock()
            .await
            .iter()
            .find(|r| r.channel_id == channel_id && r.message_id == message_id && r.attachment_id == attachment_id)
            .cloned())
    }

    async fn inc_stats(&self, channel_id: &str, metadata_id: i32, kind: StatKind) -> EngineResult<()> {
        self.stats.lock().await.push((channel_id.to_string(), metadata_id, kind));
        Ok(())
    }

    async fn search(
        &self,
        channel_id: &str,
        filter: &MessageFilter,
        range: PageRange,
    ) -> EngineResult<Vec<Message>> {
        let connector_messages = self.connector_messages.lock().await;
        let matches: Vec<Message> = self
            .messages
            .lock()
            .await
            .iter()
            .filter(|m| m.channel_id == channel_id)
            .filter(|m| filter.correlation_id.as_deref().is_none_or(|c| m.correlation_id.as_deref() == Some(c)))
            .filter(|m| filter.received_after.is_none_or(|a| m.received_at >= a))
            .filter(|m| filter.received_before.is_none_or(|b| m.received_at <= b))
            .filter(|m| {
                filter.status.is_none_or(|want| {
                    connector_messages
                        .get(&(m.channel_id.clone(), m.message_id, 0))
                        .is_some_and(|cm| cm.status == want)
                })
            })
            .cloned()
            .collect();
        let start = range.offset.max(0) as usize;
        Ok(matches.into_iter().skip(start).take(range.limit.max(0) as usize).collect())
    }

    async fn count_by_filter(&self, channel_id: &str, filter: &MessageFilter) -> EngineResult<i64> {
        Ok(self.search(channel_id, filter, PageRange { offset: 0, limit: i64::MAX }).await?.len() as i64)
    }
}

/// A destination connector whose behavior is scripted by test code: either
/// always succeeds with a fixed response, or always fails with a fixed
/// error (simulating a peer that always returns 500).
pub struct ScriptedDestination {
    pub fail: bool,
    pub response: Option<Vec<u8>>,
    pub attempts: Arc<Mutex<u32>>,
}

impl ScriptedDestination {
    pub fn succeeding(response: Option<Vec<u8>>) -> Self {
        Self { fail: false, response, attempts: Arc::new(Mutex::new(0)) }
    }

    pub fn always_failing() -> Self {
        Self { fail: true, response: None, attempts: Arc::new(Mutex::new(0)) }
    }

    pub async fn attempt_count(&self) -> u32 {
        *self.attempts.lock().await
    }
}

#[async_trait]
impl DestinationConnector for ScriptedDestination {
    async fn send(&self, _encoded: &[u8], _data_type: Option<&str>) -> EngineResult<SendOutcome> {
        *self.attempts.lock().await += 1;
        if self.fail {
            Err(EngineError::ConnectorSend {
                connector: "scripted".into(),
                detail: "simulated remote 500".into(),
            })
        } else {
            Ok(SendOutcome { response: self.response.clone(), response_data_type: None })
        }
    }
}

/// Accepts every response as valid. Used for destinations not exercising
/// response-validation demotion.
pub struct AcceptingValidator;

#[async_trait]
impl ResponseValidator for AcceptingValidator {
    async fn validate(&self, _response: &SendOutcome) -> EngineResult<()> {
        Ok(())
    }
}

/// A filter driven by a plain closure, for scripting source/destination
/// accept-reject decisions per test without a real scripting sandbox.
pub struct PredicateFilter<F: Fn(&Value) -> bool + Send + Sync>(pub F);

impl<F: Fn(&Value) -> bool + Send + Sync> Filter for PredicateFilter<F> {
    fn evaluate(&self, payload: &Value) -> EngineResult<bool> {
        Ok((self.0)(payload))
    }
}

/// Produces a canned HL7-style ACK whose code reflects the outcome, without
/// hard-coding `AR` as the rejection code (the runtime's auto-ack mapping
/// decides that; this responder only renders the chosen code as bytes).
pub struct CannedAutoResponder;

#[async_trait]
impl AutoResponder for CannedAutoResponder {
    async fn build_response(&self, outcome: &ProcessingOutcome) -> EngineResult<Vec<u8>> {
        let code = match outcome {
            ProcessingOutcome::Sent => "AA",
            ProcessingOutcome::Error => "AE",
            ProcessingOutcome::Filtered => "AR",
        };
        Ok(format!("MSA|{code}").into_bytes())
    }
}

/// A polling source connector that hands out a fixed queue of messages, one
/// per `poll()` call, then reports nothing once drained. `polls` counts every
/// call regardless of whether a message was available.
pub struct ScriptedSourceConnector {
    queue: Mutex<Vec<Vec<u8>>>,
    pub polls: Arc<Mutex<u32>>,
}

impl ScriptedSourceConnector {
    pub fn with_messages(messages: Vec<Vec<u8>>) -> Self {
        Self {
            queue: Mutex::new(messages.into_iter().rev().collect()),
            polls: Arc::new(Mutex::new(0)),
        }
    }

    pub async fn poll_count(&self) -> u32 {
        *self.polls.lock().await
    }
}

#[async_trait]
impl SourceConnector for ScriptedSourceConnector {
    async fn poll(&self) -> EngineResult<Option<InboundMessage>> {
        *self.polls.lock().await += 1;
        Ok(self.queue.lock().await.pop().map(|raw| InboundMessage {
            raw,
            data_type: None,
            source_map: Value::Null,
        }))
    }
}

/// A `PollAuthority` whose answer is fixed by the test and whose call count
/// is observable, standing in for the mode/lease authorization chain.
pub struct ScriptedPollAuthority {
    pub allow: bool,
    pub calls: Arc<Mutex<u32>>,
}

impl ScriptedPollAuthority {
    pub fn allowing() -> Self {
        Self { allow: true, calls: Arc::new(Mutex::new(0)) }
    }

    pub fn denying() -> Self {
        Self { allow: false, calls: Arc::new(Mutex::new(0)) }
    }

    pub async fn call_count(&self) -> u32 {
        *self.calls.lock().await
    }
}

#[async_trait]
impl PollAuthority for ScriptedPollAuthority {
    async fn authorize(&self, _channel_id: &str) -> EngineResult<bool> {
        *self.calls.lock().await += 1;
        Ok(self.allow)
    }
}

/// Assembles a one-destination `ChannelRuntime` with passthrough
/// preprocessing/transforms, a scripted source filter, and the given
/// destination connector/retry policy. Good enough to drive
/// `dispatch_raw_message` end-to-end in tests.
pub fn build_single_destination_runtime(
    channel_id: &str,
    source_filter: Arc<dyn Filter>,
    destination_filter: Arc<dyn Filter>,
    connector: Arc<dyn DestinationConnector>,
    retry: RetryPolicy,
    response_selector: ResponseSelector,
) -> Arc<ChannelRuntime> {
    let source_pipeline = SourcePipeline {
        channel_id: channel_id.to_string(),
        server_id: "test-server".to_string(),
        destination_count: 1,
        preprocessor: Arc::new(Passthrough),
        source_filter,
        source_transformer: Arc::new(Passthrough) as Arc<dyn Transformer>,
        destination_set_filter: Arc::new(Passthrough),
        attachment_handler: None,
    };

    let destination_pipeline = DestinationPipeline {
        channel_id: channel_id.to_string(),
        metadata_id: 1,
        name: "lab".to_string(),
        filter: destination_filter,
        transformer: Arc::new(Passthrough) as Arc<dyn Transformer>,
        response_transformer: Arc::new(Passthrough) as Arc<dyn Transformer>,
        connector,
        validator: Arc::new(AcceptingValidator),
    };

    let destination = DestinationRuntime {
        name: "lab".to_string(),
        pipeline: destination_pipeline,
        queue: Arc::new(DurableQueue::new(64)),
        retry,
    };

    Arc::new(ChannelRuntime::new(
        source_pipeline,
        vec![destination],
        response_selector,
        Some(Arc::new(CannedAutoResponder)),
    ))
}

/// Assembles a one-destination `ChannelRuntime` configured as a polling
/// source (`with_polling`) rather than one driven purely by
/// `dispatch_raw_message` calls from test code.
pub fn build_polling_channel_runtime(
    channel_id: &str,
    source_connector: Arc<dyn SourceConnector>,
    poll_authority: Arc<dyn PollAuthority>,
    poll_interval: std::time::Duration,
    connector: Arc<dyn DestinationConnector>,
) -> Arc<ChannelRuntime> {
    let source_pipeline = SourcePipeline {
        channel_id: channel_id.to_string(),
        server_id: "test-server".to_string(),
        destination_count: 1,
        preprocessor: Arc::new(Passthrough),
        source_filter: Arc::new(Passthrough),
        source_transformer: Arc::new(Passthrough) as Arc<dyn Transformer>,
        destination_set_filter: Arc::new(Passthrough),
        attachment_handler: None,
    };

    let destination_pipeline = DestinationPipeline {
        channel_id: channel_id.to_string(),
        metadata_id: 1,
        name: "lab".to_string(),
        filter: Arc::new(Passthrough),
        transformer: Arc::new(Passthrough) as Arc<dyn Transformer>,
        response_transformer: Arc::new(Passthrough) as Arc<dyn Transformer>,
        connector,
        validator: Arc::new(AcceptingValidator),
    };

    let destination = DestinationRuntime {
        name: "lab".to_string(),
        pipeline: destination_pipeline,
        queue: Arc::new(DurableQueue::new(64)),
        retry: RetryPolicy { send_first: true, ..RetryPolicy::default() },
    };

    let runtime = ChannelRuntime::new(source_pipeline, vec![destination], ResponseSelector::SourceStatus, None)
        .with_polling(source_connector, poll_authority, poll_interval);
    Arc::new(runtime)
}
