//! Negative-stock diagnosis projection
//!
//! Persists the latest diagnosis per (venue, item) so operator tooling
//! can show why a balance went negative without replaying the ledger.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use outbox::{EventHandler, Result};
use stock_core::models::{NegativeDiagnosis, MODEL_NEGATIVE_DIAGNOSIS};
use stock_core::{EventPayload, OutboxEvent, Storage};

/// Applies `stock.negative-detected` events to the diagnosis records
pub struct NegativeDiagnosisHandler {
    storage: Arc<Storage>,
}

impl NegativeDiagnosisHandler {
    /// Create the handler over the shared store
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl EventHandler for NegativeDiagnosisHandler {
    fn name(&self) -> &str {
        "negative-diagnosis"
    }

    async fn handle(&self, event: &OutboxEvent, payload: &EventPayload) -> Result<()> {
        let (venue, item, balance, recent_sequences, hypothesis, detected_at) = match payload {
            EventPayload::NegativeStockDetectedV1 {
                venue,
                item,
                balance,
                recent_sequences,
                hypothesis,
                detected_at,
            } => (
                venue,
                item,
                *balance,
                recent_sequences.clone(),
                hypothesis.clone(),
                *detected_at,
            ),
            _ => return Ok(()),
        };

        let existing: Option<NegativeDiagnosis> =
            self.storage
                .read_model(venue, MODEL_NEGATIVE_DIAGNOSIS, item.as_str())?;
        if let Some(record) = &existing {
            if record.last_applied_event_id == event.event_id {
                debug!(event_id = %event.event_id, "detection already applied");
                return Ok(());
            }
        }

        let record = NegativeDiagnosis {
            balance,
            recent_sequences,
            hypothesis,
            detected_at,
            last_applied_event_id: event.event_id,
            updated_at: Utc::now(),
        };
        self.storage
            .put_read_model(venue, MODEL_NEGATIVE_DIAGNOSIS, item.as_str(), &record)?;
        Ok(())
    }
}
