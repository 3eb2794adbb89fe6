// tests/integration/retry_exhaustion_test.rs

//! Scenario: a destination with `retryCount = 2` whose connector always
//! fails. Expect three send attempts total (initial + 2 retries), a final
//! ERROR connector-message status, and an empty queue once retries are
//! exhausted.

use std::sync::Arc;
use std::time::Duration;

use clinicmesh::core::channel::pipeline::Passthrough;
use clinicmesh::core::channel::response::ResponseSelector;
use clinicmesh::core::channel::retry::RetryPolicy;
use clinicmesh::core::sequence::{InMemorySequenceSource, SequenceSource};
use clinicmesh::core::store::model::ConnectorStatus;

use crate::integration::test_helpers::{
    build_single_destination_runtime, InMemoryMessageStore, ScriptedDestination,
};

#[tokio::test]
async fn exhausted_retries_leave_connector_message_in_error_with_empty_queue() {
    let store = Arc::new(InMemoryMessageStore::new());
    let sequence = InMemorySequenceSource::new();
    let connector = Arc::new(ScriptedDestination::always_failing());

    let retry = RetryPolicy {
        retry_count: 2,
        retry_interval: Duration::from_millis(5),
        rotate: false,
        send_first: false,
    };

    let runtime = build_single_destination_runtime(
        "billing-feed",
        Arc::new(Passthrough),
        Arc::new(Passthrough),
        connector.clone(),
        retry,
        ResponseSelector::SourceStatus,
    );
    runtime.deploy().await.unwrap();
    sequence.ensure_channel("billing-feed").await.unwrap();
    let sequence: Arc<dyn SequenceSource> = Arc::new(sequence);
    runtime
        .start(
            store.clone() as Arc<dyn clinicmesh::core::store::traits::MessageStore>,
            sequence.clone(),
        )
        .await
        .unwrap();

    let (message_id, _) = runtime
        .dispatch_raw_message(store.as_ref(), &sequence, b"claim-1", None, serde_json::Value::Null)
        .await
        .unwrap();

    // The worker retries with a short delay between attempts; poll for the
    // terminal state instead of sleeping a fixed, possibly-flaky duration.
    let mut final_status = None;
    for _ in 0..200 {
        let cm = store.connector_message("billing-feed", message_id, 1).await;
        if let Some(cm) = &cm {
            if cm.status == ConnectorStatus::Error && cm.send_attempts == 3 {
                final_status = Some(cm.status);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(final_status, Some(ConnectorStatus::Error));
    assert_eq!(connector.attempt_count().await, 3);

    let cm = store.connector_message("billing-feed", message_id, 1).await.unwrap();
    assert_eq!(cm.send_attempts, 3);
    assert!(cm.error.is_some());
}
