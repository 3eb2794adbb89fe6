// src/core/metrics.rs

//! Defines and registers Prometheus metrics for engine monitoring.
//!
//! Uses `lazy_static` so metrics are registered exactly once for the whole
//! process lifetime, mirroring the registration style of an in-memory-store
//! ancestor of this codebase.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramVec, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
    register_histogram_vec,
};

lazy_static! {
    // --- Cluster gauges ---
    pub static ref CLUSTER_ALIVE_SERVERS: Gauge = register_gauge!(
        "engine_cluster_alive_servers",
        "Number of servers currently considered alive by this instance."
    )
    .unwrap();
    pub static ref CLUSTER_TOTAL_SERVERS: Gauge = register_gauge!(
        "engine_cluster_total_servers",
        "Number of ONLINE+SHADOW servers known to this instance."
    )
    .unwrap();
    pub static ref CLUSTER_HAS_QUORUM: Gauge = register_gauge!(
        "engine_cluster_has_quorum",
        "1 if this instance currently observes quorum, 0 otherwise."
    )
    .unwrap();

    // --- Channel gauges ---
    pub static ref CHANNELS_DEPLOYED: Gauge = register_gauge!(
        "engine_channels_deployed",
        "Number of channels currently deployed on this instance."
    )
    .unwrap();
    pub static ref CHANNEL_STATE: GaugeVec = register_gauge_vec!(
        "engine_channel_state",
        "1 for the channel's current lifecycle state, labeled by channel and state.",
        &["channel", "state"]
    )
    .unwrap();
    pub static ref DESTINATION_QUEUE_DEPTH: GaugeVec = register_gauge_vec!(
        "engine_destination_queue_depth",
        "Number of items currently buffered in a destination queue.",
        &["channel", "metadata_id"]
    )
    .unwrap();

    // --- Message counters ---
    pub static ref MESSAGES_RECEIVED_TOTAL: CounterVec = register_counter_vec!(
        "engine_messages_received_total",
        "Total number of messages received on a channel's source.",
        &["channel"]
    )
    .unwrap();
    pub static ref MESSAGES_FILTERED_TOTAL: CounterVec = register_counter_vec!(
        "engine_messages_filtered_total",
        "Total number of messages rejected by a filter.",
        &["channel"]
    )
    .unwrap();
    pub static ref MESSAGES_SENT_TOTAL: CounterVec = register_counter_vec!(
        "engine_messages_sent_total",
        "Total number of connector-messages that reached SENT.",
        &["channel", "metadata_id"]
    )
    .unwrap();
    pub static ref MESSAGES_ERROR_TOTAL: CounterVec = register_counter_vec!(
        "engine_messages_error_total",
        "Total number of connector-messages that ended in ERROR.",
        &["channel", "metadata_id"]
    )
    .unwrap();
    pub static ref MESSAGES_QUEUED_TOTAL: CounterVec = register_counter_vec!(
        "engine_messages_queued_total",
        "Total number of connector-messages that were queued for retry.",
        &["channel", "metadata_id"]
    )
    .unwrap();

    // --- Sequence allocator ---
    pub static ref SEQUENCE_BLOCKS_ACQUIRED_TOTAL: Counter = register_counter!(
        "engine_sequence_blocks_acquired_total",
        "Total number of sequence blocks acquired from the database."
    )
    .unwrap();

    // --- Lease manager ---
    pub static ref LEASES_HELD: Gauge = register_gauge!(
        "engine_leases_held",
        "Number of polling leases currently held by this instance."
    )
    .unwrap();
    pub static ref LEASES_LOST_TOTAL: Counter = register_counter!(
        "engine_leases_lost_total",
        "Total number of polling leases lost by this instance."
    )
    .unwrap();

    // --- Pipeline latency ---
    pub static ref PIPELINE_STAGE_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "engine_pipeline_stage_duration_seconds",
        "Wall-clock duration of a single pipeline stage.",
        &["stage"]
    )
    .unwrap();
    pub static ref DISPATCH_DURATION_SECONDS: Histogram = register_histogram!(
        "engine_remote_dispatch_duration_seconds",
        "Duration of a cross-instance remote dispatch HTTP call."
    )
    .unwrap();
}

/// Encodes all registered metrics in the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
