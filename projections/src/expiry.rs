//! Expiring-soon index
//!
//! Lot-tracked movements whose expiry falls within the horizon upsert
//! an index record per (venue, item, lot); an OUT movement for the lot
//! removes it. Already-expired lots stay indexed until consumed, so
//! they keep showing up in the kitchen's morning check.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use outbox::{EventHandler, Result};
use stock_core::models::{expiry_record_key, ExpiringLot, MODEL_EXPIRING_SOON};
use stock_core::types::{LotId, StockAction};
use stock_core::{EventPayload, OutboxEvent, Storage};

/// Maintains the expiring-soon index from `stock.movement` events
pub struct ExpiryHandler {
    storage: Arc<Storage>,
    horizon_days: u32,
}

impl ExpiryHandler {
    /// Create the handler; lots expiring within `horizon_days` are indexed
    pub fn new(storage: Arc<Storage>, horizon_days: u32) -> Self {
        Self {
            storage,
            horizon_days,
        }
    }
}

#[async_trait]
impl EventHandler for ExpiryHandler {
    fn name(&self) -> &str {
        "expiring-soon"
    }

    async fn handle(&self, event: &OutboxEvent, payload: &EventPayload) -> Result<()> {
        let (venue, item, action, lot, expiry) = match payload {
            EventPayload::StockMovementV1 {
                venue,
                item,
                action,
                lot: Some(lot),
                expiry,
                ..
            } => (venue, item, *action, LotId::new(lot.clone()), *expiry),
            _ => return Ok(()),
        };

        let record_key = expiry_record_key(item, &lot);

        // Consumption retires the lot from the index; deletion is
        // naturally idempotent
        if action == StockAction::Out {
            self.storage
                .delete_read_model(venue, MODEL_EXPIRING_SOON, &record_key)?;
            debug!(venue = %venue, item = %item, lot = %lot, "lot consumed, index entry removed");
            return Ok(());
        }

        let expiry = match expiry {
            Some(expiry) => expiry,
            None => return Ok(()),
        };
        let days_left = (expiry - Utc::now().date_naive()).num_days();
        if days_left > i64::from(self.horizon_days) {
            return Ok(());
        }

        let existing: Option<ExpiringLot> =
            self.storage
                .read_model(venue, MODEL_EXPIRING_SOON, &record_key)?;
        if let Some(record) = &existing {
            if record.last_applied_event_id == event.event_id {
                debug!(event_id = %event.event_id, "movement already applied");
                return Ok(());
            }
        }

        let record = ExpiringLot {
            item: item.clone(),
            lot,
            expiry,
            last_applied_event_id: event.event_id,
            updated_at: Utc::now(),
        };
        self.storage
            .put_read_model(venue, MODEL_EXPIRING_SOON, &record_key, &record)?;
        Ok(())
    }
}
