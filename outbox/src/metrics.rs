//! Prometheus metrics for the outbox

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, register_int_counter,
    register_int_gauge, CounterVec, Histogram, HistogramVec, IntCounter, IntGauge,
};

lazy_static! {
    /// Total events staged for dispatch
    pub static ref EVENTS_EMITTED_TOTAL: CounterVec = register_counter_vec!(
        "outbox_emitted_total",
        "Total events staged for dispatch",
        &["topic"]
    )
    .unwrap();

    /// Dispatch outcomes per topic
    pub static ref DISPATCH_TOTAL: CounterVec = register_counter_vec!(
        "outbox_dispatch_total",
        "Dispatch outcomes",
        &["topic", "status"]
    )
    .unwrap();

    /// Handler wall time per topic
    pub static ref DISPATCH_DURATION: HistogramVec = register_histogram_vec!(
        "outbox_dispatch_duration_seconds",
        "Handler wall time in seconds",
        &["topic"]
    )
    .unwrap();

    /// Events claimed per tick
    pub static ref CLAIM_BATCH_SIZE: Histogram = register_histogram!(
        "outbox_claim_batch_size",
        "Events claimed per consumer tick"
    )
    .unwrap();

    /// Events awaiting a terminal outcome (the outbox lag)
    pub static ref PENDING_EVENTS: IntGauge = register_int_gauge!(
        "outbox_pending_events",
        "Events awaiting a terminal outcome"
    )
    .unwrap();

    /// Events moved to the dead-letter store
    pub static ref DLQ_TOTAL: IntCounter = register_int_counter!(
        "outbox_dlq_total",
        "Events moved to the dead-letter store"
    )
    .unwrap();

    /// Dead letters requeued by an operator
    pub static ref REPLAYED_TOTAL: IntCounter = register_int_counter!(
        "outbox_replayed_total",
        "Dead letters requeued by an operator"
    )
    .unwrap();

    /// Events re-applied by a read-model rebuild
    pub static ref REBUILD_APPLIED_TOTAL: IntCounter = register_int_counter!(
        "outbox_rebuild_applied_total",
        "Events re-applied by a read-model rebuild"
    )
    .unwrap();
}
