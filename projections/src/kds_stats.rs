//! Daily kitchen throughput projection
//!
//! One record per (venue, UTC day, station, item): ticket count, total
//! preparation time, fastest and slowest line.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use outbox::{EventHandler, Result};
use stock_core::models::{kds_record_key, KdsDayStats, MODEL_KDS_DAY_STATS};
use stock_core::{EventPayload, OutboxEvent, Storage};

/// Applies `kds.ticket.closed` events to the day-stats records
pub struct KdsStatsHandler {
    storage: Arc<Storage>,
}

impl KdsStatsHandler {
    /// Create the handler over the shared store
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl EventHandler for KdsStatsHandler {
    fn name(&self) -> &str {
        "kds-day-stats"
    }

    async fn handle(&self, event: &OutboxEvent, payload: &EventPayload) -> Result<()> {
        let (venue, station, item, elapsed_ms, closed_at) = match payload {
            EventPayload::KdsTicketClosedV1 {
                venue,
                station,
                item,
                elapsed_ms,
                closed_at,
                ..
            } => (venue, station, item, *elapsed_ms, *closed_at),
            _ => return Ok(()),
        };

        let record_key = kds_record_key(closed_at.date_naive(), station, item);
        let existing: Option<KdsDayStats> =
            self.storage
                .read_model(venue, MODEL_KDS_DAY_STATS, &record_key)?;
        if let Some(stats) = &existing {
            if stats.last_applied_event_id == event.event_id {
                debug!(event_id = %event.event_id, "ticket already applied");
                return Ok(());
            }
        }

        let stats = match existing {
            Some(stats) => KdsDayStats {
                count: stats.count + 1,
                total_ms: stats.total_ms + elapsed_ms,
                fastest_ms: stats.fastest_ms.min(elapsed_ms),
                slowest_ms: stats.slowest_ms.max(elapsed_ms),
                last_applied_event_id: event.event_id,
                updated_at: Utc::now(),
            },
            None => KdsDayStats {
                count: 1,
                total_ms: elapsed_ms,
                fastest_ms: elapsed_ms,
                slowest_ms: elapsed_ms,
                last_applied_event_id: event.event_id,
                updated_at: Utc::now(),
            },
        };

        self.storage
            .put_read_model(venue, MODEL_KDS_DAY_STATS, &record_key, &stats)?;
        Ok(())
    }
}
