// tests/integration/hl7_adt_test.rs

//! Scenario: a single instance receives a raw message on a channel with one
//! destination, the destination accepts it, and the caller of
//! `dispatchRawMessage` gets back the destination's ACK.

use std::sync::Arc;

use clinicmesh::core::channel::pipeline::Passthrough;
use clinicmesh::core::channel::response::ResponseSelector;
use clinicmesh::core::channel::retry::RetryPolicy;
use clinicmesh::core::sequence::{InMemorySequenceSource, SequenceSource};
use clinicmesh::core::store::model::ConnectorStatus;

use crate::integration::test_helpers::{
    build_single_destination_runtime, InMemoryMessageStore, ScriptedDestination,
};

#[tokio::test]
async fn single_instance_adt_message_is_received_sent_and_acked() {
    let store = InMemoryMessageStore::new();
    let sequence = InMemorySequenceSource::new();
    let connector = Arc::new(ScriptedDestination::succeeding(Some(b"MSA|AA|12345".to_vec())));

    let runtime = build_single_destination_runtime(
        "adt-feed",
        Arc::new(Passthrough),
        Arc::new(Passthrough),
        connector.clone(),
        RetryPolicy { send_first: true, ..RetryPolicy::default() },
        ResponseSelector::Destination("lab".into()),
    );
    runtime.deploy().await.unwrap();
    sequence.ensure_channel("adt-feed").await.unwrap();

    let raw = b"MSH|^~\\&|SENDER|FAC|RECV|FAC|20240101||ADT^A01|1|P|2.3";
    let (message_id, response) = runtime
        .dispatch_raw_message(&store, &sequence, raw, Some("HL7V2"), serde_json::json!({}))
        .await
        .unwrap();

    assert_eq!(message_id, 1);
    assert_eq!(response, Some(b"MSA|AA".to_vec()));

    let source_cm = store.connector_message("adt-feed", message_id, 0).await.unwrap();
    assert_eq!(source_cm.status, ConnectorStatus::Transformed);

    assert_eq!(
        store.stat_count("adt-feed", 0, clinicmesh::core::store::model::StatKind::Received).await,
        1
    );
}

#[tokio::test]
async fn second_message_on_same_channel_gets_the_next_sequence_id() {
    let store = InMemoryMessageStore::new();
    let sequence = InMemorySequenceSource::new();
    let connector = Arc::new(ScriptedDestination::succeeding(None));

    let runtime = build_single_destination_runtime(
        "adt-feed",
        Arc::new(Passthrough),
        Arc::new(Passthrough),
        connector,
        RetryPolicy::default(),
        ResponseSelector::SourceStatus,
    );
    runtime.deploy().await.unwrap();
    sequence.ensure_channel("adt-feed").await.unwrap();

    let (first, _) = runtime
        .dispatch_raw_message(&store, &sequence, b"one", None, serde_json::Value::Null)
        .await
        .unwrap();
    let (second, _) = runtime
        .dispatch_raw_message(&store, &sequence, b"two", None, serde_json::Value::Null)
        .await
        .unwrap();

    assert_eq!(first, 1);
    assert_eq!(second, 2);
}
