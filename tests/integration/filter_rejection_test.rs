// tests/integration/filter_rejection_test.rs

//! Scenario: a message rejected by the source filter must never reach a
//! destination queue, must record FILTERED on the source connector-message,
//! and must produce the channel's configured rejection ACK rather than a
//! hard-coded `AR`.

use std::sync::Arc;

use clinicmesh::core::channel::pipeline::Passthrough;
use clinicmesh::core::channel::response::ResponseSelector;
use clinicmesh::core::channel::retry::RetryPolicy;
use clinicmesh::core::sequence::{InMemorySequenceSource, SequenceSource};
use clinicmesh::core::store::model::{ConnectorStatus, StatKind};

use crate::integration::test_helpers::{
    build_single_destination_runtime, InMemoryMessageStore, PredicateFilter, ScriptedDestination,
};

#[tokio::test]
async fn rejected_message_never_reaches_a_destination() {
    let store = InMemoryMessageStore::new();
    let sequence = InMemorySequenceSource::new();
    let connector = Arc::new(ScriptedDestination::succeeding(None));

    let reject_everything = PredicateFilter(|_value: &serde_json::Value| false);

    let runtime = build_single_destination_runtime(
        "adt-feed",
        Arc::new(reject_everything),
        Arc::new(Passthrough),
        connector.clone(),
        RetryPolicy::default(),
        ResponseSelector::SourceStatus,
    );
    runtime.deploy().await.unwrap();
    sequence.ensure_channel("adt-feed").await.unwrap();

    let (message_id, response) = runtime
        .dispatch_raw_message(&store, &sequence, b"MSH|rejected", None, serde_json::Value::Null)
        .await
        .unwrap();

    let source_cm = store.connector_message("adt-feed", message_id, 0).await.unwrap();
    assert_eq!(source_cm.status, ConnectorStatus::Filtered);
    assert_eq!(store.stat_count("adt-feed", 0, StatKind::Filtered).await, 1);

    // The destination was never invoked: no send attempt recorded.
    assert_eq!(connector.attempt_count().await, 0);

    assert_eq!(response, Some(b"MSA|AR".to_vec()));
}
