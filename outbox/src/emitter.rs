//! Standalone event producer
//!
//! Ledger and audit appends stage their events inside the append batch;
//! this emitter covers every other producer (kitchen displays, manual
//! tooling, projections during rebuild), writing the event in its own
//! small transaction.

use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use stock_core::{EventPayload, OutboxEvent, Storage};

use crate::metrics::EVENTS_EMITTED_TOTAL;
use crate::Result;

/// Stages events in the durable outbox
pub struct Emitter {
    storage: Arc<Storage>,
}

impl Emitter {
    /// Create an emitter over the shared store
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Stage one event under its default partition key
    pub fn emit(&self, payload: &EventPayload) -> Result<Uuid> {
        let event = OutboxEvent::new(payload)?;
        self.stage(event)
    }

    /// Stage one event under an explicit partition key
    pub fn emit_with_key(&self, partition_key: impl Into<String>, payload: &EventPayload) -> Result<Uuid> {
        let event = OutboxEvent::with_partition_key(payload, partition_key.into())?;
        self.stage(event)
    }

    fn stage(&self, event: OutboxEvent) -> Result<Uuid> {
        self.storage.insert_events(std::slice::from_ref(&event))?;
        EVENTS_EMITTED_TOTAL
            .with_label_values(&[event.topic.as_str()])
            .inc();
        debug!(
            event_id = %event.event_id,
            topic = %event.topic,
            partition_key = %event.partition_key,
            "event staged"
        );
        Ok(event.event_id)
    }
}
