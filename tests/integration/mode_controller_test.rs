// tests/integration/mode_controller_test.rs

//! Scenario: a channel configured as a polling source only drives its
//! source connector when the poll authority (the Mode Controller plus
//! Polling Lease Manager in a real deployment) grants it, and never touches
//! the connector or the store otherwise.

use std::sync::Arc;
use std::time::Duration;

use clinicmesh::core::store::model::ConnectorStatus;

use crate::integration::test_helpers::{
    build_polling_channel_runtime, InMemoryMessageStore, ScriptedDestination, ScriptedPollAuthority,
    ScriptedSourceConnector,
};

#[tokio::test]
async fn denied_poll_authority_keeps_the_channel_from_polling_at_all() {
    let store = Arc::new(InMemoryMessageStore::new());
    let source = Arc::new(ScriptedSourceConnector::with_messages(vec![b"claim-1".to_vec()]));
    let authority = Arc::new(ScriptedPollAuthority::denying());
    let destination = Arc::new(ScriptedDestination::succeeding(None));

    let runtime = build_polling_channel_runtime(
        "shadowed-feed",
        source.clone(),
        authority.clone(),
        Duration::from_millis(5),
        destination.clone(),
    );
    runtime.deploy().await.unwrap();
    let sequence: Arc<dyn clinicmesh::core::sequence::SequenceSource> =
        Arc::new(clinicmesh::core::sequence::InMemorySequenceSource::new());
    sequence.ensure_channel("shadowed-feed").await.unwrap();
    runtime
        .start(store.clone() as Arc<dyn clinicmesh::core::store::traits::MessageStore>, sequence)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;

    assert!(authority.call_count().await > 0);
    assert_eq!(source.poll_count().await, 0);
    assert_eq!(destination.attempt_count().await, 0);
}

#[tokio::test]
async fn authorized_poll_loop_dispatches_every_available_message() {
    let store = Arc::new(InMemoryMessageStore::new());
    let source = Arc::new(ScriptedSourceConnector::with_messages(vec![
        b"claim-1".to_vec(),
        b"claim-2".to_vec(),
    ]));
    let authority = Arc::new(ScriptedPollAuthority::allowing());
    let destination = Arc::new(ScriptedDestination::succeeding(None));

    let runtime = build_polling_channel_runtime(
        "active-feed",
        source.clone(),
        authority.clone(),
        Duration::from_millis(5),
        destination.clone(),
    );
    runtime.deploy().await.unwrap();
    let sequence: Arc<dyn clinicmesh::core::sequence::SequenceSource> =
        Arc::new(clinicmesh::core::sequence::InMemorySequenceSource::new());
    sequence.ensure_channel("active-feed").await.unwrap();
    runtime
        .start(store.clone() as Arc<dyn clinicmesh::core::store::traits::MessageStore>, sequence)
        .await
        .unwrap();

    let mut attempts = 0;
    for _ in 0..200 {
        attempts = destination.attempt_count().await;
        if attempts >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(attempts, 2);
    let first = store.connector_message("active-feed", 1, 0).await.unwrap();
    let second = store.connector_message("active-feed", 2, 0).await.unwrap();
    assert_eq!(first.status, ConnectorStatus::Transformed);
    assert_eq!(second.status, ConnectorStatus::Transformed);
}
