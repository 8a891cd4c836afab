//! Read-model reconstruction
//!
//! Stock projections (`on_hand`, `expiring_soon`) rebuild from the
//! ledger: each entry is re-materialized into its original movement
//! event, id included, and pushed through the same handler the live
//! consumer runs. Event-sourced projections (`kds_day_stats`,
//! `negative_diagnosis`) rebuild from the retained outbox, which keeps
//! consumed events on disk in creation order. Handler guards make both
//! paths safe to run against a live store.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use outbox::metrics::REBUILD_APPLIED_TOTAL;
use outbox::EventHandler;
use projections::{ExpiryHandler, KdsStatsHandler, NegativeDiagnosisHandler, OnHandHandler};
use stock_core::config::{ProjectionConfig, RebuildConfig};
use stock_core::models::{
    MODEL_EXPIRING_SOON, MODEL_KDS_DAY_STATS, MODEL_NEGATIVE_DIAGNOSIS, MODEL_ON_HAND,
};
use stock_core::types::{LedgerEntry, VenueId};
use stock_core::{EventPayload, OutboxEvent, Storage, Topic};

use crate::error::{Error, Result};

/// A rebuildable read model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKey {
    /// On-hand balance per item
    OnHand,
    /// Daily kitchen throughput stats
    KdsDayStats,
    /// Lots expiring within the horizon
    ExpiringSoon,
    /// Latest negative-stock diagnosis per item
    NegativeDiagnosis,
}

impl ModelKey {
    /// Every model, in rebuild order
    pub const ALL: [ModelKey; 4] = [
        ModelKey::OnHand,
        ModelKey::KdsDayStats,
        ModelKey::ExpiringSoon,
        ModelKey::NegativeDiagnosis,
    ];

    /// Parse a model name as stored in the read-model keyspace
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            MODEL_ON_HAND => Ok(ModelKey::OnHand),
            MODEL_KDS_DAY_STATS => Ok(ModelKey::KdsDayStats),
            MODEL_EXPIRING_SOON => Ok(ModelKey::ExpiringSoon),
            MODEL_NEGATIVE_DIAGNOSIS => Ok(ModelKey::NegativeDiagnosis),
            other => Err(Error::UnknownModelKey(other.to_string())),
        }
    }

    /// Model name as stored in the read-model keyspace
    pub fn model_name(&self) -> &'static str {
        match self {
            ModelKey::OnHand => MODEL_ON_HAND,
            ModelKey::KdsDayStats => MODEL_KDS_DAY_STATS,
            ModelKey::ExpiringSoon => MODEL_EXPIRING_SOON,
            ModelKey::NegativeDiagnosis => MODEL_NEGATIVE_DIAGNOSIS,
        }
    }

    /// Whether the ledger, not the outbox, is the replay source
    fn ledger_sourced(&self) -> bool {
        matches!(self, ModelKey::OnHand | ModelKey::ExpiringSoon)
    }

    /// Outbox topic an event-sourced model folds
    fn outbox_topic(&self) -> Option<Topic> {
        match self {
            ModelKey::KdsDayStats => Some(Topic::KdsTicketClosed),
            ModelKey::NegativeDiagnosis => Some(Topic::StockNegativeDetected),
            _ => None,
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.model_name())
    }
}

/// Counters reported by one rebuild run
#[derive(Debug, Clone, Serialize)]
pub struct RebuildStats {
    /// Venue rebuilt
    pub venue: VenueId,
    /// Models targeted, in rebuild order
    pub models: Vec<String>,
    /// Read-model records deleted before replay
    pub records_truncated: u64,
    /// Ledger entries re-materialized
    pub entries_scanned: u64,
    /// Retained outbox events matched by venue and topic
    pub events_scanned: u64,
    /// Handler invocations
    pub applied: u64,
    /// Handler invocations that returned an error
    pub failures: u64,
    /// Wall time of the run
    pub elapsed_ms: u64,
}

/// Replays event streams through projection handlers
pub struct Rebuilder {
    storage: Arc<Storage>,
    projections: ProjectionConfig,
    batch_size: usize,
}

impl Rebuilder {
    /// Create a rebuilder over the shared store
    pub fn new(
        storage: Arc<Storage>,
        projections: &ProjectionConfig,
        rebuild: &RebuildConfig,
    ) -> Self {
        Self {
            storage,
            projections: projections.clone(),
            batch_size: rebuild.batch_size,
        }
    }

    /// Rebuild the targeted models for one venue.
    ///
    /// With `truncate` the targeted records are wiped first, so the
    /// replay re-derives them from scratch; detections staged by the
    /// on-hand handler are re-emitted in that case. Without it the
    /// per-record guards skip everything already applied.
    pub async fn rebuild(
        &self,
        venue: &VenueId,
        model_keys: &[ModelKey],
        truncate: bool,
    ) -> Result<RebuildStats> {
        let started = Instant::now();

        // Canonical order, duplicates dropped
        let keys: Vec<ModelKey> = ModelKey::ALL
            .into_iter()
            .filter(|key| model_keys.contains(key))
            .collect();

        let mut stats = RebuildStats {
            venue: venue.clone(),
            models: keys.iter().map(|key| key.model_name().to_string()).collect(),
            records_truncated: 0,
            entries_scanned: 0,
            events_scanned: 0,
            applied: 0,
            failures: 0,
            elapsed_ms: 0,
        };

        if truncate {
            for key in &keys {
                stats.records_truncated +=
                    self.storage.truncate_read_model(venue, key.model_name())?;
            }
        }

        let ledger_handlers: Vec<(ModelKey, Arc<dyn EventHandler>)> = keys
            .iter()
            .filter(|key| key.ledger_sourced())
            .map(|key| (*key, self.handler_for(*key)))
            .collect();
        if !ledger_handlers.is_empty() {
            self.replay_ledger(venue, &ledger_handlers, &mut stats)
                .await?;
        }

        let outbox_handlers: Vec<(ModelKey, Topic, Arc<dyn EventHandler>)> = keys
            .iter()
            .filter_map(|key| {
                key.outbox_topic()
                    .map(|topic| (*key, topic, self.handler_for(*key)))
            })
            .collect();
        if !outbox_handlers.is_empty() {
            self.replay_outbox(venue, &outbox_handlers, &mut stats)
                .await?;
        }

        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            venue = %venue,
            models = ?stats.models,
            truncated = stats.records_truncated,
            applied = stats.applied,
            failures = stats.failures,
            elapsed_ms = stats.elapsed_ms,
            "rebuild finished"
        );
        Ok(stats)
    }

    /// The same handler construction the live registry uses
    fn handler_for(&self, key: ModelKey) -> Arc<dyn EventHandler> {
        match key {
            ModelKey::OnHand => Arc::new(OnHandHandler::new(
                self.storage.clone(),
                self.projections.diagnosis_window,
            )),
            ModelKey::ExpiringSoon => Arc::new(ExpiryHandler::new(
                self.storage.clone(),
                self.projections.expiring_soon_days,
            )),
            ModelKey::KdsDayStats => Arc::new(KdsStatsHandler::new(self.storage.clone())),
            ModelKey::NegativeDiagnosis => {
                Arc::new(NegativeDiagnosisHandler::new(self.storage.clone()))
            }
        }
    }

    async fn replay_ledger(
        &self,
        venue: &VenueId,
        handlers: &[(ModelKey, Arc<dyn EventHandler>)],
        stats: &mut RebuildStats,
    ) -> Result<()> {
        let mut after = 0u64;
        loop {
            let batch = self
                .storage
                .ledger_entries_after(venue, after, self.batch_size)?;
            match batch.last() {
                Some(entry) => after = entry.sequence,
                None => break,
            }

            for entry in &batch {
                stats.entries_scanned += 1;
                let (event, payload) = movement_event(entry)?;
                for (key, handler) in handlers {
                    self.apply(handler.as_ref(), &event, &payload, *key, stats)
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn replay_outbox(
        &self,
        venue: &VenueId,
        handlers: &[(ModelKey, Topic, Arc<dyn EventHandler>)],
        stats: &mut RebuildStats,
    ) -> Result<()> {
        let mut after: Option<Uuid> = None;
        loop {
            let batch = self.storage.outbox_events_after(after, self.batch_size)?;
            match batch.last() {
                Some(event) => after = Some(event.event_id),
                None => break,
            }

            for event in &batch {
                if event.venue != *venue {
                    continue;
                }
                if !handlers.iter().any(|(_, topic, _)| *topic == event.topic) {
                    continue;
                }
                stats.events_scanned += 1;

                let payload = match event.decode_payload() {
                    Ok(payload) => payload,
                    Err(error) => {
                        stats.failures += 1;
                        warn!(event_id = %event.event_id, %error, "skipping undecodable event");
                        continue;
                    }
                };
                for (key, topic, handler) in handlers {
                    if *topic != event.topic {
                        continue;
                    }
                    self.apply(handler.as_ref(), event, &payload, *key, stats)
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn apply(
        &self,
        handler: &dyn EventHandler,
        event: &OutboxEvent,
        payload: &EventPayload,
        key: ModelKey,
        stats: &mut RebuildStats,
    ) {
        stats.applied += 1;
        match handler.handle(event, payload).await {
            Ok(()) => REBUILD_APPLIED_TOTAL.inc(),
            Err(error) => {
                stats.failures += 1;
                warn!(
                    event_id = %event.event_id,
                    model = %key,
                    %error,
                    "rebuild dispatch failed"
                );
            }
        }
    }
}

/// Re-materialize the movement event a ledger entry was committed with.
///
/// The event id and creation time come from the entry, so handler guards
/// written by a live dispatch match the replayed event exactly.
fn movement_event(entry: &LedgerEntry) -> Result<(OutboxEvent, EventPayload)> {
    let payload = EventPayload::StockMovementV1 {
        venue: entry.venue.clone(),
        sequence: entry.sequence,
        item: entry.item.clone(),
        action: entry.action,
        quantity: entry.quantity,
        unit: entry.unit,
        lot: entry.lot.as_ref().map(|lot| lot.as_str().to_string()),
        expiry: entry.expiry,
        reason: entry.reason.clone(),
        source: entry.source.clone(),
        actor: entry.actor.clone(),
        occurred_at: entry.occurred_at,
        risk_tag: None,
    };
    let mut event = OutboxEvent::new(&payload).map_err(stock_core::Error::from)?;
    event.event_id = entry.movement_event_id;
    event.created_at = entry.recorded_at;
    Ok((event, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use stock_core::models::{KdsDayStats, OnHandRecord};
    use stock_core::types::{
        ActorId, ItemId, LedgerEntrySpec, SourceRef, StockAction, Unit,
    };
    use stock_core::{CoreConfig, Metrics, StockLedger};

    fn setup() -> (Rebuilder, StockLedger, Arc<Storage>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = CoreConfig::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let storage = Arc::new(Storage::open(&config).unwrap());
        let ledger = StockLedger::new(storage.clone(), &config.ledger, Metrics::default());
        let rebuilder = Rebuilder::new(storage.clone(), &config.projections, &config.rebuild);
        (rebuilder, ledger, storage, temp_dir)
    }

    fn spec(item: &str, action: StockAction, quantity: i64, source_id: &str) -> LedgerEntrySpec {
        LedgerEntrySpec {
            venue: VenueId::new("V1"),
            item: ItemId::new(item),
            action,
            quantity: Decimal::from(quantity),
            unit: Unit::Piece,
            lot: None,
            expiry: None,
            reason: "test".to_string(),
            source: SourceRef::new("doc", source_id),
            actor: ActorId::new("tester"),
            request_id: None,
            occurred_at: None,
        }
    }

    async fn apply_live(storage: &Arc<Storage>, rebuilder: &Rebuilder) {
        // Push staged movement events through the live handler path
        let handler = rebuilder.handler_for(ModelKey::OnHand);
        for event in storage.pending_events().unwrap() {
            let payload = event.decode_payload().unwrap();
            handler.handle(&event, &payload).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_rebuild_restores_truncated_balances() {
        let (rebuilder, ledger, storage, _temp) = setup();
        let venue = VenueId::new("V1");

        ledger.append(spec("flour", StockAction::In, 10, "S1")).await.unwrap();
        ledger.append(spec("flour", StockAction::Out, 4, "S2")).await.unwrap();
        ledger.append(spec("salt", StockAction::In, 3, "S3")).await.unwrap();
        apply_live(&storage, &rebuilder).await;

        let before: OnHandRecord = storage
            .read_model(&venue, MODEL_ON_HAND, "flour")
            .unwrap()
            .unwrap();

        let stats = rebuilder
            .rebuild(&venue, &[ModelKey::OnHand], true)
            .await
            .unwrap();
        assert_eq!(stats.records_truncated, 2);
        assert_eq!(stats.entries_scanned, 3);
        assert_eq!(stats.applied, 3);
        assert_eq!(stats.failures, 0);

        let after: OnHandRecord = storage
            .read_model(&venue, MODEL_ON_HAND, "flour")
            .unwrap()
            .unwrap();
        assert_eq!(after.quantity, before.quantity);
        assert_eq!(after.last_sequence, before.last_sequence);
        assert_eq!(after.last_applied_event_id, before.last_applied_event_id);

        let salt: OnHandRecord = storage
            .read_model(&venue, MODEL_ON_HAND, "salt")
            .unwrap()
            .unwrap();
        assert_eq!(salt.quantity, Decimal::from(3));
    }

    #[tokio::test]
    async fn test_rebuild_without_truncate_is_guarded() {
        let (rebuilder, ledger, storage, _temp) = setup();
        let venue = VenueId::new("V1");

        ledger.append(spec("flour", StockAction::In, 10, "S1")).await.unwrap();
        apply_live(&storage, &rebuilder).await;
        let before: OnHandRecord = storage
            .read_model(&venue, MODEL_ON_HAND, "flour")
            .unwrap()
            .unwrap();

        let stats = rebuilder
            .rebuild(&venue, &[ModelKey::OnHand], false)
            .await
            .unwrap();
        assert_eq!(stats.records_truncated, 0);
        assert_eq!(stats.applied, 1);

        // Guard short-circuits before the write, timestamp included
        let after: OnHandRecord = storage
            .read_model(&venue, MODEL_ON_HAND, "flour")
            .unwrap()
            .unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_event_sourced_rebuild_from_retained_outbox() {
        let (rebuilder, _ledger, storage, _temp) = setup();
        let venue = VenueId::new("V1");

        for (minute, elapsed_ms) in [(0u32, 240_000u64), (5, 180_000)] {
            let payload = EventPayload::KdsTicketClosedV1 {
                venue: venue.clone(),
                ticket_id: format!("T{}", minute),
                station: "grill".to_string(),
                item: ItemId::new("burger"),
                elapsed_ms,
                closed_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap(),
            };
            let event = OutboxEvent::new(&payload).unwrap();
            storage.insert_events(std::slice::from_ref(&event)).unwrap();
        }

        let stats = rebuilder
            .rebuild(&venue, &[ModelKey::KdsDayStats], false)
            .await
            .unwrap();
        assert_eq!(stats.events_scanned, 2);
        assert_eq!(stats.applied, 2);

        let record: KdsDayStats = storage
            .read_model(&venue, MODEL_KDS_DAY_STATS, "2026-03-01|grill|burger")
            .unwrap()
            .unwrap();
        assert_eq!(record.count, 2);
        assert_eq!(record.total_ms, 420_000);
    }

    #[tokio::test]
    async fn test_rebuild_ignores_other_venues() {
        let (rebuilder, ledger, storage, _temp) = setup();

        ledger.append(spec("flour", StockAction::In, 10, "S1")).await.unwrap();
        let mut other = spec("flour", StockAction::In, 99, "S2");
        other.venue = VenueId::new("V2");
        ledger.append(other).await.unwrap();

        let stats = rebuilder
            .rebuild(&VenueId::new("V1"), &[ModelKey::OnHand], true)
            .await
            .unwrap();
        assert_eq!(stats.entries_scanned, 1);

        let record: OnHandRecord = storage
            .read_model(&VenueId::new("V1"), MODEL_ON_HAND, "flour")
            .unwrap()
            .unwrap();
        assert_eq!(record.quantity, Decimal::from(10));
        assert!(storage
            .read_model::<OnHandRecord>(&VenueId::new("V2"), MODEL_ON_HAND, "flour")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_model_key_parses_stored_names() {
        for key in ModelKey::ALL {
            assert_eq!(ModelKey::parse(key.model_name()).unwrap(), key);
        }
        assert!(matches!(
            ModelKey::parse("receipts"),
            Err(Error::UnknownModelKey(name)) if name == "receipts"
        ));
    }
}
