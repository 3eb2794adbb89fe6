// src/core/channel/pipeline.rs

//! Source and destination pipeline steps (§4.8). Scripted stages
//! (preprocessor, filter, transformer, response transformer) are represented
//! as trait objects supplied by channel configuration; this engine drives
//! them but does not embed a scripting runtime.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::core::connector::{
    AttachmentHandler, DestinationConnector, ProcessingOutcome, ResponseValidator,
};
use crate::core::error::{EngineError, EngineResult};
use crate::core::metrics::PIPELINE_STAGE_DURATION_SECONDS;
use crate::core::sequence::SequenceSource;
use crate::core::store::model::{
    ConnectorMessage, ConnectorStatus, ContentRow, ContentType,
};
use crate::core::store::traits::MessageStore;

/// A scripted accept/reject decision over a message at some stage.
pub trait Filter: Send + Sync {
    fn evaluate(&self, payload: &Value) -> EngineResult<bool>;
}

/// A scripted content transformation, e.g. mapping between data types.
pub trait Transformer: Send + Sync {
    fn apply(&self, payload: &Value) -> EngineResult<Value>;
}

/// A filter/transformer that always passes/identity-transforms. Used when a
/// channel configures no script for a given stage.
pub struct Passthrough;

impl Filter for Passthrough {
    fn evaluate(&self, _payload: &Value) -> EngineResult<bool> {
        Ok(true)
    }
}

impl Transformer for Passthrough {
    fn apply(&self, payload: &Value) -> EngineResult<Value> {
        Ok(payload.clone())
    }
}

async fn timed_stage<F, T>(stage: &'static str, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let result = f.await;
    PIPELINE_STAGE_DURATION_SECONDS
        .with_label_values(&[stage])
        .observe(start.elapsed().as_secs_f64());
    result
}

fn content_error(stage: &str, e: impl std::fmt::Display) -> EngineError {
    EngineError::Script {
        stage: stage.to_string(),
        detail: e.to_string(),
    }
}

/// Outcome of running the source pipeline for one inbound message.
pub struct SourceRunOutcome {
    pub message_id: i64,
    pub filtered: bool,
    pub encoded: Vec<u8>,
    pub enabled_destinations: Vec<usize>,
}

/// Drives steps 1-10 of the source pipeline for one channel.
pub struct SourcePipeline {
    pub channel_id: String,
    pub server_id: String,
    pub destination_count: usize,
    pub preprocessor: Arc<dyn Transformer>,
    pub source_filter: Arc<dyn Filter>,
    pub source_transformer: Arc<dyn Transformer>,
    pub destination_set_filter: Arc<dyn Filter>,
    pub attachment_handler: Option<Arc<dyn AttachmentHandler>>,
}

impl SourcePipeline {
    pub async fn run(
        &self,
        store: &dyn MessageStore,
        sequence: &dyn SequenceSource,
        raw: &[u8],
        data_type: Option<&str>,
        source_map: Value,
        batch_sequence_id: Option<i64>,
    ) -> EngineResult<SourceRunOutcome> {
        let message_id = sequence.next_id(&self.channel_id).await?;

        store
            .create_message(&self.channel_id, message_id, &self.server_id, batch_sequence_id)
            .await?;
        store
            .upsert_connector_message(&ConnectorMessage::new_received(
                &self.channel_id,
                message_id,
                0,
            ))
            .await?;
        for metadata_id in 1..=self.destination_count as i32 {
            store
                .upsert_connector_message(&ConnectorMessage::new_received(
                    &self.channel_id,
                    message_id,
                    metadata_id,
                ))
                .await?;
        }

        let (deattached, attachments) = match &self.attachment_handler {
            Some(handler) => handler.extract(raw)?,
            None => (raw.to_vec(), Vec::new()),
        };
        for (attachment_id, data) in &attachments {
            store
                .put_attachment(&crate::core::store::model::AttachmentRow {
                    channel_id: self.channel_id.clone(),
                    message_id,
                    attachment_id: attachment_id.clone(),
                    content_type: data_type.unwrap_or("application/octet-stream").to_string(),
                    data: data.clone(),
                })
                .await?;
        }

        self.put_content(store, message_id, 0, ContentType::Raw, &deattached, data_type)
            .await?;

        let raw_value = bytes_to_value(&deattached);
        let processed = timed_stage("preprocessor", async {
            self.preprocessor.apply(&raw_value)
        })
        .await
        .map_err(|e| content_error("preprocessor", e))?;
        self.put_json_content(store, message_id, 0, ContentType::ProcessedRaw, &processed)
            .await?;

        let passed = timed_stage("source_filter", async {
            self.source_filter.evaluate(&processed)
        })
        .await
        .map_err(|e| content_error("source filter", e))?;

        if !passed {
            store
                .upsert_connector_message(&ConnectorMessage {
                    status: ConnectorStatus::Filtered,
                    ..ConnectorMessage::new_received(&self.channel_id, message_id, 0)
                })
                .await?;
            store
                .inc_stats(&self.channel_id, 0, crate::core::store::model::StatKind::Filtered)
                .await?;
            return Ok(SourceRunOutcome {
                message_id,
                filtered: true,
                encoded: Vec::new(),
                enabled_destinations: Vec::new(),
            });
        }

        let transformed = timed_stage("source_transformer", async {
            self.source_transformer.apply(&processed)
        })
        .await
        .map_err(|e| content_error("source transformer", e))?;
        self.put_json_content(store, message_id, 0, ContentType::Transformed, &transformed)
            .await?;
        let encoded = value_to_bytes(&transformed);
        self.put_content(store, message_id, 0, ContentType::Encoded, &encoded, data_type)
            .await?;

        let route = timed_stage("destination_set_filter", async {
            self.destination_set_filter.evaluate(&transformed)
        })
        .await
        .map_err(|e| content_error("destination set filter", e))?;

        let enabled_destinations = if route {
            (1..=self.destination_count).collect()
        } else {
            Vec::new()
        };

        store
            .upsert_connector_message(&ConnectorMessage {
                status: ConnectorStatus::Transformed,
                ..ConnectorMessage::new_received(&self.channel_id, message_id, 0)
            })
            .await?;
        store
            .inc_stats(&self.channel_id, 0, crate::core::store::model::StatKind::Received)
            .await?;

        Ok(SourceRunOutcome {
            message_id,
            filtered: false,
            encoded,
            enabled_destinations,
        })
    }

    async fn put_content(
        &self,
        store: &dyn MessageStore,
        message_id: i64,
        metadata_id: i32,
        content_type: ContentType,
        payload: &[u8],
        data_type: Option<&str>,
    ) -> EngineResult<()> {
        store
            .put_content(&ContentRow {
                channel_id: self.channel_id.clone(),
                message_id,
                metadata_id,
                content_type,
                payload: payload.to_vec(),
                data_type: data_type.map(str::to_string),
                encrypted: false,
            })
            .await
    }

    async fn put_json_content(
        &self,
        store: &dyn MessageStore,
        message_id: i64,
        metadata_id: i32,
        content_type: ContentType,
        value: &Value,
    ) -> EngineResult<()> {
        self.put_content(
            store,
            message_id,
            metadata_id,
            content_type,
            &value_to_bytes(value),
            Some("application/json"),
        )
        .await
    }
}

/// Outcome of running the destination pipeline for one work item.
pub struct DestinationRunOutcome {
    pub status: ConnectorStatus,
}

/// Drives steps 1-5 of the destination pipeline for one queued work item.
pub struct DestinationPipeline {
    pub channel_id: String,
    pub metadata_id: i32,
    pub name: String,
    pub filter: Arc<dyn Filter>,
    pub transformer: Arc<dyn Transformer>,
    pub response_transformer: Arc<dyn Transformer>,
    pub connector: Arc<dyn DestinationConnector>,
    pub validator: Arc<dyn ResponseValidator>,
}

impl DestinationPipeline {
    pub async fn run(
        &self,
        store: &dyn MessageStore,
        message_id: i64,
    ) -> EngineResult<DestinationRunOutcome> {
        let encoded_row = store
            .get_content(&self.channel_id, message_id, 0, ContentType::Encoded)
            .await?
            .ok_or_else(|| {
                EngineError::Internal(format!(
                    "missing encoded source content for message {message_id}"
                ))
            })?;
        let source_value = bytes_to_value(&encoded_row.payload);

        let passed = timed_stage("destination_filter", async { self.filter.evaluate(&source_value) })
            .await
            .map_err(|e| content_error("destination filter", e))?;
        if !passed {
            self.upsert_status(store, message_id, ConnectorStatus::Filtered).await?;
            store
                .inc_stats(&self.channel_id, self.metadata_id, crate::core::store::model::StatKind::Filtered)
                .await?;
            return Ok(DestinationRunOutcome {
                status: ConnectorStatus::Filtered,
            });
        }

        let transformed = timed_stage("destination_transformer", async {
            self.transformer.apply(&source_value)
        })
        .await
        .map_err(|e| content_error("destination transformer", e))?;
        self.put_json_content(store, message_id, ContentType::Transformed, &transformed)
            .await?;
        let encoded = value_to_bytes(&transformed);
        self.put_content(store, message_id, ContentType::Encoded, &encoded, encoded_row.data_type.as_deref())
            .await?;
        self.put_content(store, message_id, ContentType::Sent, &encoded, encoded_row.data_type.as_deref())
            .await?;

        let send_result = self
            .connector
            .send(&encoded, encoded_row.data_type.as_deref())
            .await;

        let outcome = match send_result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.record_error(store, message_id, &e.to_string()).await?;
                return Ok(DestinationRunOutcome {
                    status: ConnectorStatus::Error,
                });
            }
        };

        if let Some(response) = &outcome.response {
            self.put_content(store, message_id, ContentType::Response, response, outcome.response_data_type.as_deref())
                .await?;
            let response_value = bytes_to_value(response);
            let response_transformed = timed_stage("response_transformer", async {
                self.response_transformer.apply(&response_value)
            })
            .await
            .map_err(|e| content_error("response transformer", e))?;
            self.put_json_content(store, message_id, ContentType::ResponseTransformed, &response_transformed)
                .await?;
            self.put_json_content(store, message_id, ContentType::ProcessedResponse, &response_transformed)
                .await?;
        }

        match self.validator.validate(&outcome).await {
            Ok(()) => {
                self.upsert_status(store, message_id, ConnectorStatus::Sent).await?;
                store
                    .inc_stats(&self.channel_id, self.metadata_id, crate::core::store::model::StatKind::Sent)
                    .await?;
                Ok(DestinationRunOutcome {
                    status: ConnectorStatus::Sent,
                })
            }
            Err(e) => {
                self.record_error(store, message_id, &e.to_string()).await?;
                Ok(DestinationRunOutcome {
                    status: ConnectorStatus::Error,
                })
            }
        }
    }

    async fn record_error(&self, store: &dyn MessageStore, message_id: i64, detail: &str) -> EngineResult<()> {
        self.put_content(store, message_id, ContentType::ProcessingError, detail.as_bytes(), Some("text/plain"))
            .await?;
        let mut cm = store
            .get_connector_message(&self.channel_id, message_id, self.metadata_id)
            .await?
            .unwrap_or_else(|| ConnectorMessage::new_received(&self.channel_id, message_id, self.metadata_id));
        cm.status = ConnectorStatus::Error;
        cm.send_attempts += 1;
        cm.error = Some(detail.to_string());
        store.upsert_connector_message(&cm).await?;
        store
            .inc_stats(&self.channel_id, self.metadata_id, crate::core::store::model::StatKind::Error)
            .await
    }

    /// The number of send attempts already recorded for this connector-message,
    /// i.e. how many times `record_error` has run against it so far.
    pub(crate) async fn recorded_attempts(&self, store: &dyn MessageStore, message_id: i64) -> EngineResult<u32> {
        Ok(store
            .get_connector_message(&self.channel_id, message_id, self.metadata_id)
            .await?
            .map(|cm| cm.send_attempts as u32)
            .unwrap_or(0))
    }

    async fn upsert_status(
        &self,
        store: &dyn MessageStore,
        message_id: i64,
        status: ConnectorStatus,
    ) -> EngineResult<()> {
        let mut cm = store
            .get_connector_message(&self.channel_id, message_id, self.metadata_id)
            .await?
            .unwrap_or_else(|| {
                ConnectorMessage::new_received(&self.channel_id, message_id, self.metadata_id)
            });
        cm.status = status;
        if status == ConnectorStatus::Sent {
            cm.sent_at = Some(chrono::Utc::now());
        }
        store.upsert_connector_message(&cm).await
    }

    async fn put_content(
        &self,
        store: &dyn MessageStore,
        message_id: i64,
        content_type: ContentType,
        payload: &[u8],
        data_type: Option<&str>,
    ) -> EngineResult<()> {
        store
            .put_content(&ContentRow {
                channel_id: self.channel_id.clone(),
                message_id,
                metadata_id: self.metadata_id,
                content_type,
                payload: payload.to_vec(),
                data_type: data_type.map(str::to_string),
                encrypted: false,
            })
            .await
    }

    async fn put_json_content(
        &self,
        store: &dyn MessageStore,
        message_id: i64,
        content_type: ContentType,
        value: &Value,
    ) -> EngineResult<()> {
        self.put_content(
            store,
            message_id,
            content_type,
            &value_to_bytes(value),
            Some("application/json"),
        )
        .await
    }
}

fn bytes_to_value(raw: &[u8]) -> Value {
    serde_json::from_slice(raw).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(raw).into_owned()))
}

fn value_to_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::String(s) => s.clone().into_bytes(),
        other => serde_json::to_vec(other).unwrap_or_default(),
    }
}

pub fn outcome_for_status(status: ConnectorStatus) -> ProcessingOutcome {
    match status {
        ConnectorStatus::Sent | ConnectorStatus::Transformed | ConnectorStatus::Queued => ProcessingOutcome::Sent,
        ConnectorStatus::Filtered => ProcessingOutcome::Filtered,
        ConnectorStatus::Received | ConnectorStatus::Pending | ConnectorStatus::Error => ProcessingOutcome::Error,
    }
}
