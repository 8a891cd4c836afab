//! Stock ledger API
//!
//! Appends are serialized per venue by an async lock, so sequence numbers
//! and prev-hashes are assigned race-free in-process. The entry, its
//! indexes, the balance record, and the outbox events it produces commit
//! in one storage batch; a failed append leaves nothing behind.

use crate::{
    chain::{self, chain_hash, ChainReport, GENESIS_HASH},
    config::LedgerConfig,
    error::{Error, Result},
    event::{EventPayload, OutboxEvent},
    metrics::Metrics,
    models::{OnHandRecord, MODEL_ON_HAND},
    storage::Storage,
    types::{
        ItemBalance, ItemId, LedgerEntry, LedgerEntrySpec, NegativeStockPolicy, VenueId,
    },
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Allowed clock skew on caller-supplied timestamps
const MAX_FUTURE_SKEW_S: i64 = 60;

/// Risk tag carried by movement events appended under WARN while negative
const RISK_TAG_NEGATIVE: &str = "negative-stock";

/// Append-only stock ledger over hash-chained per-venue streams
pub struct StockLedger {
    storage: Arc<Storage>,
    metrics: Metrics,
    default_policy: NegativeStockPolicy,
    policy_overrides: RwLock<BTreeMap<String, NegativeStockPolicy>>,
    append_locks: DashMap<VenueId, Arc<Mutex<()>>>,
}

impl StockLedger {
    /// Create a ledger over opened storage, policies seeded from config
    pub fn new(storage: Arc<Storage>, config: &LedgerConfig, metrics: Metrics) -> Self {
        Self {
            storage,
            metrics,
            default_policy: config.negative_stock_policy,
            policy_overrides: RwLock::new(config.venue_policies.clone()),
            append_locks: DashMap::new(),
        }
    }

    fn venue_lock(&self, venue: &VenueId) -> Arc<Mutex<()>> {
        self.append_locks
            .entry(venue.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Negative-stock policy in effect for a venue
    pub fn policy_for(&self, venue: &VenueId) -> NegativeStockPolicy {
        self.policy_overrides
            .read()
            .get(venue.as_str())
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Override the negative-stock policy for a venue at runtime
    pub fn set_policy(&self, venue: &VenueId, policy: NegativeStockPolicy) {
        self.policy_overrides
            .write()
            .insert(venue.as_str().to_string(), policy);
        tracing::info!(venue = %venue, policy = %policy, "Negative-stock policy changed");
    }

    /// Append a stock movement.
    ///
    /// Duplicate source identity or request id returns the previously
    /// stored entry without appending or emitting. `ChainRace` means the
    /// persisted head moved under the append; it is safe to retry with
    /// the same request id.
    pub async fn append(&self, spec: LedgerEntrySpec) -> Result<LedgerEntry> {
        let started = Instant::now();
        spec.validate()?;
        let signed = spec.signed_quantity()?;

        let now = Utc::now();
        let occurred_at = spec.occurred_at.unwrap_or(now);
        if occurred_at > now + chrono::Duration::seconds(MAX_FUTURE_SKEW_S) {
            return Err(Error::Validation(
                "occurred_at is in the future".to_string(),
            ));
        }

        let lock = self.venue_lock(&spec.venue);
        let _guard = lock.lock().await;

        // Idempotency: source identity first, then request id
        if let Some(existing) = self.storage.ledger_entry_by_source(
            &spec.venue,
            &spec.source,
            &spec.item,
            spec.action,
        )? {
            self.metrics.record_duplicate();
            tracing::info!(
                venue = %spec.venue,
                item = %spec.item,
                source = %spec.source,
                sequence = existing.sequence,
                "Duplicate source identity, returning stored entry"
            );
            return Ok(existing);
        }
        if let Some(request_id) = &spec.request_id {
            if let Some(existing) = self
                .storage
                .ledger_entry_by_request(&spec.venue, request_id)?
            {
                self.metrics.record_duplicate();
                tracing::info!(
                    venue = %spec.venue,
                    request_id = %request_id,
                    sequence = existing.sequence,
                    "Duplicate request id, returning stored entry"
                );
                return Ok(existing);
            }
        }

        let head = self.storage.ledger_head(&spec.venue)?;
        let (sequence, prev_hash) = match &head {
            Some(head) => (head.sequence + 1, head.entry_hash.clone()),
            None => (1, GENESIS_HASH.to_string()),
        };

        // Balance and policy are evaluated under the same lock the append
        // holds, so BLOCK decisions cannot go stale.
        let current = self.storage.item_balance(&spec.venue, &spec.item)?;
        if let Some(balance) = &current {
            if balance.unit != spec.unit {
                self.metrics.record_rejection();
                return Err(Error::Validation(format!(
                    "unit {} does not match unit {} recorded for item {}",
                    spec.unit, balance.unit, spec.item
                )));
            }
        }
        let before = current.map(|b| b.quantity).unwrap_or(Decimal::ZERO);
        let after = before + signed;
        let goes_negative = after < Decimal::ZERO;

        let policy = self.policy_for(&spec.venue);
        if goes_negative && policy == NegativeStockPolicy::Block {
            self.metrics.record_rejection();
            tracing::warn!(
                venue = %spec.venue,
                item = %spec.item,
                balance = %before,
                requested = %signed,
                "Append blocked by negative-stock policy"
            );
            return Err(Error::PolicyBlock {
                venue: spec.venue.to_string(),
                item: spec.item.to_string(),
                balance: before,
                requested: signed,
            });
        }

        let risk_tag = if goes_negative && policy == NegativeStockPolicy::Warn {
            Some(RISK_TAG_NEGATIVE.to_string())
        } else {
            None
        };

        let movement = OutboxEvent::new(&EventPayload::StockMovementV1 {
            venue: spec.venue.clone(),
            sequence,
            item: spec.item.clone(),
            action: spec.action,
            quantity: signed,
            unit: spec.unit,
            lot: spec.lot.as_ref().map(|lot| lot.as_str().to_string()),
            expiry: spec.expiry,
            reason: spec.reason.clone(),
            source: spec.source.clone(),
            actor: spec.actor.clone(),
            occurred_at,
            risk_tag,
        })?;

        let mut entry = LedgerEntry {
            venue: spec.venue.clone(),
            sequence,
            item: spec.item.clone(),
            action: spec.action,
            quantity: signed,
            unit: spec.unit,
            lot: spec.lot.clone(),
            expiry: spec.expiry,
            reason: spec.reason.clone(),
            source: spec.source.clone(),
            actor: spec.actor.clone(),
            occurred_at,
            recorded_at: now,
            prev_hash: prev_hash.clone(),
            entry_hash: String::new(),
            request_id: spec.request_id.clone(),
            movement_event_id: movement.event_id,
        };
        entry.entry_hash = chain_hash(&prev_hash, &entry.canonical_payload());

        let mut events = vec![movement];
        if goes_negative {
            // BLOCK already returned; ALLOW and WARN both warn
            events.push(OutboxEvent::new(&EventPayload::NegativeStockWarningV1 {
                venue: spec.venue.clone(),
                item: spec.item.clone(),
                balance: after,
                sequence,
            })?);
            self.metrics.record_negative_balance();
            tracing::warn!(
                venue = %spec.venue,
                item = %spec.item,
                balance = %after,
                sequence,
                "Balance went negative"
            );
        }

        let balance_record = ItemBalance {
            quantity: after,
            unit: spec.unit,
            last_sequence: sequence,
            updated_at: now,
        };

        match self
            .storage
            .append_ledger_atomic(&entry, &balance_record, &events, head.as_ref())
        {
            Ok(()) => {}
            Err(err @ Error::ChainRace { .. }) => {
                self.metrics.record_chain_race();
                tracing::warn!(venue = %spec.venue, sequence, "Ledger head moved during append");
                return Err(err);
            }
            Err(err) => return Err(err),
        }

        self.metrics
            .record_append(started.elapsed().as_secs_f64(), events.len());
        tracing::info!(
            venue = %spec.venue,
            sequence,
            item = %spec.item,
            action = %spec.action,
            quantity = %signed,
            "Appended stock entry"
        );

        Ok(entry)
    }

    /// Current balance for an item.
    ///
    /// Prefers the on-hand projection record; falls back to the
    /// transactional balance record, and to zero for items that never
    /// moved.
    pub fn balance(&self, venue: &VenueId, item: &ItemId) -> Result<Decimal> {
        if let Some(record) =
            self.storage
                .read_model::<OnHandRecord>(venue, MODEL_ON_HAND, item.as_str())?
        {
            return Ok(record.quantity);
        }
        Ok(self
            .storage
            .item_balance(venue, item)?
            .map(|balance| balance.quantity)
            .unwrap_or(Decimal::ZERO))
    }

    /// Entries for an item, newest first
    pub fn history(
        &self,
        venue: &VenueId,
        item: &ItemId,
        limit: usize,
        before_sequence: Option<u64>,
    ) -> Result<Vec<LedgerEntry>> {
        self.storage
            .ledger_history(venue, item, limit, before_sequence)
    }

    /// Fetch one entry by sequence
    pub fn entry(&self, venue: &VenueId, sequence: u64) -> Result<Option<LedgerEntry>> {
        self.storage.ledger_entry(venue, sequence)
    }

    /// Recompute the venue's whole chain and report the first bad link
    pub fn verify(&self, venue: &VenueId) -> Result<ChainReport> {
        let entries = self.storage.ledger_entries(venue)?;
        let report = chain::verify(&entries);
        self.metrics.record_verification();
        if !report.ok {
            tracing::error!(
                venue = %venue,
                first_bad_index = report.first_bad_index,
                "Ledger chain verification failed"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::types::{ActorId, LotId, SourceRef, StockAction, Unit};
    use tempfile::TempDir;

    fn test_ledger(default_policy: NegativeStockPolicy) -> (StockLedger, Arc<Storage>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = CoreConfig::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.ledger.negative_stock_policy = default_policy;

        let storage = Arc::new(Storage::open(&config).unwrap());
        let ledger = StockLedger::new(storage.clone(), &config.ledger, Metrics::default());
        (ledger, storage, temp_dir)
    }

    fn spec(
        venue: &str,
        item: &str,
        action: StockAction,
        quantity: i64,
        source_id: &str,
    ) -> LedgerEntrySpec {
        LedgerEntrySpec {
            venue: VenueId::new(venue),
            item: ItemId::new(item),
            action,
            quantity: Decimal::from(quantity),
            unit: Unit::Kilogram,
            lot: None,
            expiry: None,
            reason: "test".to_string(),
            source: SourceRef::new("grn", source_id),
            actor: ActorId::new("alice"),
            request_id: None,
            occurred_at: None,
        }
    }

    #[tokio::test]
    async fn test_append_chains_entries() {
        let (ledger, _storage, _temp) = test_ledger(NegativeStockPolicy::Allow);
        let venue = VenueId::new("V1");

        let first = ledger
            .append(spec("V1", "flour", StockAction::In, 10, "G1"))
            .await
            .unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(first.prev_hash, GENESIS_HASH);

        let second = ledger
            .append(spec("V1", "flour", StockAction::Out, 4, "O1"))
            .await
            .unwrap();
        assert_eq!(second.sequence, 2);
        assert_eq!(second.prev_hash, first.entry_hash);
        assert_eq!(second.quantity, Decimal::from(-4));

        let report = ledger.verify(&venue).unwrap();
        assert!(report.ok);
        assert_eq!(report.entries_checked, 2);
    }

    #[tokio::test]
    async fn test_append_emits_movement_event() {
        let (ledger, storage, _temp) = test_ledger(NegativeStockPolicy::Allow);

        let entry = ledger
            .append(spec("V1", "flour", StockAction::In, 10, "G1"))
            .await
            .unwrap();

        let pending = storage.pending_events().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event_id, entry.movement_event_id);

        match pending[0].decode_payload().unwrap() {
            EventPayload::StockMovementV1 {
                sequence,
                quantity,
                risk_tag,
                ..
            } => {
                assert_eq!(sequence, 1);
                assert_eq!(quantity, Decimal::from(10));
                assert_eq!(risk_tag, None);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_source_identity_is_idempotent() {
        let (ledger, storage, _temp) = test_ledger(NegativeStockPolicy::Allow);

        let first = ledger
            .append(spec("V1", "flour", StockAction::In, 10, "G1"))
            .await
            .unwrap();
        let repeat = ledger
            .append(spec("V1", "flour", StockAction::In, 10, "G1"))
            .await
            .unwrap();

        assert_eq!(repeat.sequence, first.sequence);
        assert_eq!(repeat.entry_hash, first.entry_hash);
        assert_eq!(storage.pending_count().unwrap(), 1);
        assert_eq!(
            storage
                .ledger_entries(&VenueId::new("V1"))
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_duplicate_request_id_is_idempotent() {
        let (ledger, storage, _temp) = test_ledger(NegativeStockPolicy::Allow);

        let mut first_spec = spec("V1", "flour", StockAction::In, 10, "G1");
        first_spec.request_id = Some("req-1".to_string());
        let first = ledger.append(first_spec).await.unwrap();

        // Same request id from a different source document
        let mut retry = spec("V1", "flour", StockAction::In, 10, "G2");
        retry.request_id = Some("req-1".to_string());
        let repeat = ledger.append(retry).await.unwrap();

        assert_eq!(repeat.sequence, first.sequence);
        assert_eq!(storage.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_source_different_action_appends() {
        let (ledger, _storage, _temp) = test_ledger(NegativeStockPolicy::Allow);

        ledger
            .append(spec("V1", "flour", StockAction::In, 10, "D1"))
            .await
            .unwrap();
        let out = ledger
            .append(spec("V1", "flour", StockAction::Out, 2, "D1"))
            .await
            .unwrap();
        assert_eq!(out.sequence, 2);
    }

    #[tokio::test]
    async fn test_block_policy_refuses_negative() {
        let (ledger, storage, _temp) = test_ledger(NegativeStockPolicy::Block);
        let venue = VenueId::new("V1");
        let item = ItemId::new("flour");

        ledger
            .append(spec("V1", "flour", StockAction::In, 5, "G1"))
            .await
            .unwrap();

        let err = ledger
            .append(spec("V1", "flour", StockAction::Out, 8, "O1"))
            .await
            .unwrap_err();
        match err {
            Error::PolicyBlock {
                balance, requested, ..
            } => {
                assert_eq!(balance, Decimal::from(5));
                assert_eq!(requested, Decimal::from(-8));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // Nothing committed, nothing emitted beyond the first append
        assert_eq!(ledger.balance(&venue, &item).unwrap(), Decimal::from(5));
        assert_eq!(storage.ledger_entries(&venue).unwrap().len(), 1);
        assert_eq!(storage.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_block_policy_allows_down_to_zero() {
        let (ledger, _storage, _temp) = test_ledger(NegativeStockPolicy::Block);

        ledger
            .append(spec("V1", "flour", StockAction::In, 5, "G1"))
            .await
            .unwrap();
        let out = ledger
            .append(spec("V1", "flour", StockAction::Out, 5, "O1"))
            .await
            .unwrap();
        assert_eq!(out.sequence, 2);
        assert_eq!(
            ledger
                .balance(&VenueId::new("V1"), &ItemId::new("flour"))
                .unwrap(),
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn test_allow_policy_emits_warning() {
        let (ledger, storage, _temp) = test_ledger(NegativeStockPolicy::Allow);

        ledger
            .append(spec("V1", "flour", StockAction::Out, 3, "O1"))
            .await
            .unwrap();

        let pending = storage.pending_events().unwrap();
        assert_eq!(pending.len(), 2);

        match pending[1].decode_payload().unwrap() {
            EventPayload::NegativeStockWarningV1 { balance, .. } => {
                assert_eq!(balance, Decimal::from(-3));
            }
            other => panic!("unexpected payload: {:?}", other),
        }

        // ALLOW leaves the movement untagged
        match pending[0].decode_payload().unwrap() {
            EventPayload::StockMovementV1 { risk_tag, .. } => assert_eq!(risk_tag, None),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_warn_policy_tags_movement() {
        let (ledger, storage, _temp) = test_ledger(NegativeStockPolicy::Warn);

        ledger
            .append(spec("V1", "flour", StockAction::Out, 3, "O1"))
            .await
            .unwrap();

        let pending = storage.pending_events().unwrap();
        assert_eq!(pending.len(), 2);
        match pending[0].decode_payload().unwrap() {
            EventPayload::StockMovementV1 { risk_tag, .. } => {
                assert_eq!(risk_tag.as_deref(), Some(RISK_TAG_NEGATIVE));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_policy_override_per_venue() {
        let (ledger, _storage, _temp) = test_ledger(NegativeStockPolicy::Block);
        let strict = VenueId::new("V1");
        let lax = VenueId::new("V2");

        ledger.set_policy(&lax, NegativeStockPolicy::Allow);
        assert_eq!(ledger.policy_for(&strict), NegativeStockPolicy::Block);
        assert_eq!(ledger.policy_for(&lax), NegativeStockPolicy::Allow);

        assert!(ledger
            .append(spec("V1", "flour", StockAction::Out, 1, "O1"))
            .await
            .is_err());
        assert!(ledger
            .append(spec("V2", "flour", StockAction::Out, 1, "O2"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unit_mismatch_rejected() {
        let (ledger, _storage, _temp) = test_ledger(NegativeStockPolicy::Allow);

        ledger
            .append(spec("V1", "flour", StockAction::In, 10, "G1"))
            .await
            .unwrap();

        let mut mismatched = spec("V1", "flour", StockAction::In, 2, "G2");
        mismatched.unit = Unit::Gram;
        let err = ledger.append(mismatched).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_future_occurred_at_rejected() {
        let (ledger, _storage, _temp) = test_ledger(NegativeStockPolicy::Allow);

        let mut future = spec("V1", "flour", StockAction::In, 10, "G1");
        future.occurred_at = Some(Utc::now() + chrono::Duration::seconds(300));
        assert!(matches!(
            ledger.append(future).await.unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_balance_falls_back_to_ledger_aggregate() {
        let (ledger, _storage, _temp) = test_ledger(NegativeStockPolicy::Allow);
        let venue = VenueId::new("V1");
        let item = ItemId::new("flour");

        // No projection has run; balance comes from the append-time record
        assert_eq!(ledger.balance(&venue, &item).unwrap(), Decimal::ZERO);

        ledger
            .append(spec("V1", "flour", StockAction::In, 10, "G1"))
            .await
            .unwrap();
        ledger
            .append(spec("V1", "flour", StockAction::Out, 4, "O1"))
            .await
            .unwrap();
        ledger
            .append(spec("V1", "flour", StockAction::Adjust, -1, "A1"))
            .await
            .unwrap();

        assert_eq!(ledger.balance(&venue, &item).unwrap(), Decimal::from(5));
    }

    #[tokio::test]
    async fn test_balance_prefers_projection_record() {
        let (ledger, storage, _temp) = test_ledger(NegativeStockPolicy::Allow);
        let venue = VenueId::new("V1");
        let item = ItemId::new("flour");

        ledger
            .append(spec("V1", "flour", StockAction::In, 10, "G1"))
            .await
            .unwrap();

        let record = OnHandRecord {
            quantity: Decimal::from(7),
            unit: Unit::Kilogram,
            last_sequence: 1,
            last_applied_event_id: uuid::Uuid::now_v7(),
            updated_at: Utc::now(),
        };
        storage
            .put_read_model(&venue, MODEL_ON_HAND, item.as_str(), &record)
            .unwrap();

        assert_eq!(ledger.balance(&venue, &item).unwrap(), Decimal::from(7));
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let (ledger, _storage, _temp) = test_ledger(NegativeStockPolicy::Allow);
        let venue = VenueId::new("V1");
        let item = ItemId::new("flour");

        for i in 1..=4 {
            ledger
                .append(spec("V1", "flour", StockAction::In, i, &format!("G{}", i)))
                .await
                .unwrap();
        }

        let history = ledger.history(&venue, &item, 2, None).unwrap();
        let sequences: Vec<u64> = history.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![4, 3]);
    }

    #[tokio::test]
    async fn test_verify_detects_tampering() {
        let (ledger, storage, _temp) = test_ledger(NegativeStockPolicy::Allow);
        let venue = VenueId::new("V1");

        for i in 1..=5 {
            ledger
                .append(spec("V1", "flour", StockAction::In, 10, &format!("G{}", i)))
                .await
                .unwrap();
        }

        let mut tampered = storage.ledger_entry(&venue, 3).unwrap().unwrap();
        tampered.quantity = Decimal::from(999);
        storage.overwrite_ledger_entry(&tampered).unwrap();

        let report = ledger.verify(&venue).unwrap();
        assert!(!report.ok);
        assert_eq!(report.first_bad_index, Some(3));
        assert_eq!(report.entries_checked, 5);
    }

    #[tokio::test]
    async fn test_concurrent_appends_serialize() {
        let (ledger, _storage, _temp) = test_ledger(NegativeStockPolicy::Allow);
        let ledger = Arc::new(ledger);
        let venue = VenueId::new("V1");

        let mut handles = Vec::new();
        for i in 0..10 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .append(spec("V1", "flour", StockAction::In, 1, &format!("G{}", i)))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let report = ledger.verify(&venue).unwrap();
        assert!(report.ok);
        assert_eq!(report.entries_checked, 10);
        assert_eq!(
            ledger
                .balance(&venue, &ItemId::new("flour"))
                .unwrap(),
            Decimal::from(10)
        );
    }
}
