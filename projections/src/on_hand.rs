//! On-hand balance projection
//!
//! Folds the signed quantity of every stock movement into one record
//! per (venue, item). A post-apply negative balance stages a
//! `stock.negative-detected` event in the same write as the record, so
//! detection can never observe a balance that was not committed.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

use outbox::{EventHandler, Result};
use stock_core::models::{OnHandRecord, MODEL_ON_HAND};
use stock_core::types::{ItemId, StockAction, VenueId};
use stock_core::{EventPayload, OutboxEvent, Storage};

/// Applies `stock.movement` events to the on-hand record
pub struct OnHandHandler {
    storage: Arc<Storage>,
    diagnosis_window: usize,
}

impl OnHandHandler {
    /// Create the handler; `diagnosis_window` bounds the movement
    /// history attached to a detection event
    pub fn new(storage: Arc<Storage>, diagnosis_window: usize) -> Self {
        Self {
            storage,
            diagnosis_window,
        }
    }

    /// Build the detection payload: the most recent movements for the
    /// item and a first guess at the cause
    fn diagnose(&self, venue: &VenueId, item: &ItemId, balance: Decimal) -> Result<EventPayload> {
        let sequences =
            self.storage
                .item_sequences_desc(venue, item, self.diagnosis_window, None)?;

        let mut ins = 0usize;
        let mut outs = 0usize;
        for sequence in &sequences {
            if let Some(entry) = self.storage.ledger_entry(venue, *sequence)? {
                match entry.action {
                    StockAction::In => ins += 1,
                    StockAction::Out => outs += 1,
                    StockAction::Adjust => {}
                }
            }
        }

        let hypothesis = if outs > ins {
            format!(
                "more OUT than IN in the last {} movements ({} out, {} in); check for an unrecorded delivery",
                sequences.len(),
                outs,
                ins
            )
        } else if ins == 0 {
            format!(
                "no IN movements in the last {} movements; the opening balance may be missing",
                sequences.len()
            )
        } else {
            format!(
                "{} IN and {} OUT in the last {} movements; check adjustment entries",
                ins,
                outs,
                sequences.len()
            )
        };

        Ok(EventPayload::NegativeStockDetectedV1 {
            venue: venue.clone(),
            item: item.clone(),
            balance,
            recent_sequences: sequences,
            hypothesis,
            detected_at: Utc::now(),
        })
    }
}

#[async_trait]
impl EventHandler for OnHandHandler {
    fn name(&self) -> &str {
        "on-hand"
    }

    async fn handle(&self, event: &OutboxEvent, payload: &EventPayload) -> Result<()> {
        let (venue, sequence, item, quantity, unit) = match payload {
            EventPayload::StockMovementV1 {
                venue,
                sequence,
                item,
                quantity,
                unit,
                ..
            } => (venue, *sequence, item, *quantity, *unit),
            _ => return Ok(()),
        };

        let existing: Option<OnHandRecord> =
            self.storage.read_model(venue, MODEL_ON_HAND, item.as_str())?;
        if let Some(record) = &existing {
            if record.last_applied_event_id == event.event_id {
                debug!(event_id = %event.event_id, "movement already applied");
                return Ok(());
            }
        }

        let balance = existing
            .as_ref()
            .map(|record| record.quantity)
            .unwrap_or(Decimal::ZERO)
            + quantity;

        let record = OnHandRecord {
            quantity: balance,
            unit,
            last_sequence: sequence,
            last_applied_event_id: event.event_id,
            updated_at: Utc::now(),
        };

        let mut detections = Vec::new();
        if balance < Decimal::ZERO {
            warn!(venue = %venue, item = %item, balance = %balance, "projected balance is negative");
            detections.push(OutboxEvent::new(&self.diagnose(venue, item, balance)?)?);
        }

        self.storage.put_read_model_with_events(
            venue,
            MODEL_ON_HAND,
            item.as_str(),
            &record,
            &detections,
        )?;
        Ok(())
    }
}
