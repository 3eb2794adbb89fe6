// src/core/channel/runtime.rs

//! Ties lifecycle, queues, retry policy and the pipeline stages together
//! into one running channel (C8), and implements the single entry point
//! used by source connectors and the remote dispatcher:
//! `dispatchRawMessage`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{watch, Mutex};

use crate::core::channel::lifecycle::{ChannelState, LifecycleGuard};
use crate::core::channel::pipeline::{outcome_for_status, DestinationPipeline, SourcePipeline};
use crate::core::channel::queue::DurableQueue;
use crate::core::channel::response::{auto_ack_for, DestinationOutcome, ResponseSelector};
use crate::core::channel::retry::{RetryDecision, RetryPolicy};
use crate::core::connector::{AlwaysAuthorized, AutoResponder, PollAuthority, SourceConnector};
use crate::core::error::EngineResult;
use crate::core::metrics::{CHANNELS_DEPLOYED, CHANNEL_STATE, DESTINATION_QUEUE_DEPTH};
use crate::core::sequence::SequenceSource;
use crate::core::store::model::ConnectorStatus;
use crate::core::store::traits::MessageStore;

/// One configured destination: its pipeline, its durable queue, and its
/// retry policy.
pub struct DestinationRuntime {
    pub name: String,
    pub pipeline: DestinationPipeline,
    pub queue: Arc<DurableQueue<i64>>,
    pub retry: RetryPolicy,
}

/// A fully assembled, runnable channel.
pub struct ChannelRuntime {
    pub channel_id: String,
    lifecycle: Mutex<LifecycleGuard>,
    source_pipeline: SourcePipeline,
    destinations: Vec<DestinationRuntime>,
    response_selector: ResponseSelector,
    auto_responder: Option<Arc<dyn AutoResponder>>,
    source_connector: Option<Arc<dyn SourceConnector>>,
    poll_authority: Arc<dyn PollAuthority>,
    poll_interval: Duration,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl ChannelRuntime {
    pub fn new(
        source_pipeline: SourcePipeline,
        destinations: Vec<DestinationRuntime>,
        response_selector: ResponseSelector,
        auto_responder: Option<Arc<dyn AutoResponder>>,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            channel_id: source_pipeline.channel_id.clone(),
            lifecycle: Mutex::new(LifecycleGuard::new()),
            source_pipeline,
            destinations,
            response_selector,
            auto_responder,
            source_connector: None,
            poll_authority: Arc::new(AlwaysAuthorized),
            poll_interval: Duration::from_secs(5),
            stop_tx,
            stop_rx,
        }
    }

    /// Configures this channel as a polling source: `start` will spawn an
    /// additional loop that consults `authority` and, if authorized, calls
    /// `connector.poll()` on `interval`, feeding any result through the same
    /// `dispatch_raw_message` path used by injectors and the remote
    /// dispatcher. A listening-source channel (or one driven purely by
    /// `dispatchRawMessage`) never calls this.
    pub fn with_polling(
        mut self,
        connector: Arc<dyn SourceConnector>,
        authority: Arc<dyn PollAuthority>,
        interval: Duration,
    ) -> Self {
        self.source_connector = Some(connector);
        self.poll_authority = authority;
        self.poll_interval = interval;
        self
    }

    pub async fn state(&self) -> ChannelState {
        self.lifecycle.lock().await.state()
    }

    fn set_state_gauge(&self, state: ChannelState) {
        CHANNEL_STATE
            .with_label_values(&[&self.channel_id, "UNDEPLOYED"])
            .set(0.0);
        for s in [
            ChannelState::Stopped,
            ChannelState::Starting,
            ChannelState::Started,
            ChannelState::Pausing,
            ChannelState::Paused,
            ChannelState::Resuming,
            ChannelState::Stopping,
        ] {
            CHANNEL_STATE
                .with_label_values(&[&self.channel_id, s.as_str()])
                .set(if s as u8 == state as u8 { 1.0 } else { 0.0 });
        }
    }

    pub async fn deploy(&self) -> EngineResult<()> {
        let mut guard = self.lifecycle.lock().await;
        guard.deploy()?;
        CHANNELS_DEPLOYED.inc();
        self.set_state_gauge(guard.state());
        Ok(())
    }

    pub async fn undeploy(&self) {
        let mut guard = self.lifecycle.lock().await;
        if guard.state() != ChannelState::Undeployed {
            CHANNELS_DEPLOYED.dec();
        }
        guard.undeploy();
        self.set_state_gauge(guard.state());
    }

    /// Spawns one worker task per destination, polling its queue and
    /// running the destination pipeline until stopped, plus a source poll
    /// loop if this channel was configured with `with_polling`.
    pub async fn start(
        self: &Arc<Self>,
        store: Arc<dyn MessageStore>,
        sequence: Arc<dyn SequenceSource>,
    ) -> EngineResult<()> {
        {
            let mut guard = self.lifecycle.lock().await;
            guard.start()?;
            guard.mark_started()?;
            self.set_state_gauge(guard.state());
        }

        for (idx, destination) in self.destinations.iter().enumerate() {
            let runtime = self.clone();
            let store = store.clone();
            let queue = destination.queue.clone();
            let mut stop_rx = self.stop_rx.clone();
            let retry = destination.retry;
            tokio::spawn(async move {
                loop {
                    if *stop_rx.borrow() {
                        return;
                    }
                    let item = tokio::select! {
                        biased;
                        _ = stop_rx.changed() => None,
                        item = queue.poll_with_timeout(Duration::from_secs(1)) => item,
                    };
                    let Some(message_id) = item else {
                        continue;
                    };
                    runtime.run_destination(&store, idx, message_id, &queue, retry).await;
                }
            });
        }

        if let Some(connector) = self.source_connector.clone() {
            let runtime = self.clone();
            let store = store.clone();
            let mut stop_rx = self.stop_rx.clone();
            let interval = self.poll_interval;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = stop_rx.changed() => return,
                        _ = tokio::time::sleep(interval) => {}
                    }
                    if *stop_rx.borrow() {
                        return;
                    }
                    if runtime.state().await != ChannelState::Started {
                        continue;
                    }
                    match runtime.poll_authority.authorize(&runtime.channel_id).await {
                        Ok(true) => {}
                        Ok(false) | Err(_) => continue,
                    }
                    let Ok(Some(inbound)) = connector.poll().await else {
                        continue;
                    };
                    let _ = runtime
                        .dispatch_raw_message(
                            store.as_ref(),
                            sequence.as_ref(),
                            &inbound.raw,
                            inbound.data_type.as_deref(),
                            inbound.source_map,
                        )
                        .await;
                }
            });
        }
        Ok(())
    }

    async fn run_destination(
        &self,
        store: &Arc<dyn MessageStore>,
        idx: usize,
        message_id: i64,
        queue: &DurableQueue<i64>,
        retry: RetryPolicy,
    ) {
        let destination = &self.destinations[idx];
        // Seeded from the persisted attempt count so a non-rotating retry
        // (which hands the item back to the outer poll loop between
        // attempts, see `dispatch_raw_message`) still counts correctly
        // across separate invocations of this function.
        let attempt = destination
            .pipeline
            .recorded_attempts(store.as_ref(), message_id)
            .await
            .unwrap_or(0)
            + 1;
        let result = destination.pipeline.run(store.as_ref(), message_id).await;
        let status = match result {
            Ok(outcome) => outcome.status,
            Err(_) => ConnectorStatus::Error,
        };
        if status != ConnectorStatus::Error {
            queue.finish(&message_id).await;
            DESTINATION_QUEUE_DEPTH
                .with_label_values(&[&self.channel_id, &destination.pipeline.metadata_id.to_string()])
                .set(queue.depth().await as f64);
            return;
        }
        match retry.decide(attempt) {
            RetryDecision::Halt | RetryDecision::Exhausted => {
                queue.finish(&message_id).await;
            }
            RetryDecision::Requeue { delay } => {
                tokio::time::sleep(delay).await;
                queue.requeue(message_id, retry.rotate).await;
                // Whether rotated to the back of the buffer or left in
                // place, the next attempt is driven by a fresh poll of
                // this same worker loop, not by recursing here -
                // otherwise the message would be both replayed in place
                // and left sitting in the queue for a duplicate re-poll.
            }
        }
    }

    pub async fn stop(&self) -> EngineResult<()> {
        let mut guard = self.lifecycle.lock().await;
        guard.stop()?;
        let _ = self.stop_tx.send(true);
        guard.mark_stopped()?;
        if guard.state() != ChannelState::Undeployed {
            // channel remains deployed, just stopped
        }
        self.set_state_gauge(guard.state());
        Ok(())
    }

    pub async fn pause(&self) -> EngineResult<()> {
        let mut guard = self.lifecycle.lock().await;
        guard.pause()?;
        guard.mark_paused()?;
        self.set_state_gauge(guard.state());
        Ok(())
    }

    pub async fn resume(&self) -> EngineResult<()> {
        let mut guard = self.lifecycle.lock().await;
        guard.resume()?;
        guard.mark_resumed()?;
        self.set_state_gauge(guard.state());
        Ok(())
    }

    /// The single entry point used by source connectors and the remote
    /// dispatcher (§4.9 `dispatchRawMessage`).
    ///
    /// Destinations configured with `sendFirst` are run inline so their
    /// outcome can participate in response selection; all others are
    /// enqueued for asynchronous processing by the worker tasks spawned in
    /// `start` and are not awaited here.
    pub async fn dispatch_raw_message(
        &self,
        store: &dyn MessageStore,
        sequence: &dyn SequenceSource,
        raw: &[u8],
        data_type: Option<&str>,
        source_map: Value,
    ) -> EngineResult<(i64, Option<Vec<u8>>)> {
        let source_outcome = self
            .source_pipeline
            .run(store, sequence, raw, data_type, source_map, None)
            .await?;

        if source_outcome.filtered {
            let response = self
                .build_response(ConnectorStatus::Filtered, &[])
                .await?;
            return Ok((source_outcome.message_id, response));
        }

        let mut inline_outcomes = Vec::new();
        for &metadata_id in &source_outcome.enabled_destinations {
            let idx = metadata_id - 1;
            let destination = &self.destinations[idx];
            if destination.retry.send_first {
                let outcome = destination
                    .pipeline
                    .run(store, source_outcome.message_id)
                    .await?;
                inline_outcomes.push(DestinationOutcome {
                    name: destination.name.clone(),
                    status: outcome.status,
                    order: idx,
                });
                if outcome.status == ConnectorStatus::Error {
                    destination.queue.add(source_outcome.message_id).await;
                }
            } else {
                destination.queue.add(source_outcome.message_id).await;
                DESTINATION_QUEUE_DEPTH
                    .with_label_values(&[&self.channel_id, &metadata_id.to_string()])
                    .set(destination.queue.depth().await as f64);
            }
        }

        let response = self
            .build_response(ConnectorStatus::Transformed, &inline_outcomes)
            .await?;
        Ok((source_outcome.message_id, response))
    }

    async fn build_response(
        &self,
        source_status: ConnectorStatus,
        inline_outcomes: &[DestinationOutcome],
    ) -> EngineResult<Option<Vec<u8>>> {
        let terminal: Vec<DestinationOutcome> = inline_outcomes
            .iter()
            .filter(|o| o.status.is_terminal())
            .cloned()
            .collect();
        let selected_status = self
            .response_selector
            .select(&terminal)
            .map(|o| o.status)
            .unwrap_or(source_status);

        match &self.auto_responder {
            Some(responder) => {
                let outcome = outcome_for_status(selected_status);
                let _ = auto_ack_for(outcome);
                Ok(Some(responder.build_response(&outcome).await?))
            }
            None => Ok(None),
        }
    }
}
