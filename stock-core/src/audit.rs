//! Tamper-evident audit log
//!
//! Same chain discipline as the stock ledger: per-venue async lock, one
//! atomic batch per append, `audit.recorded` emitted in that batch. The
//! audit lock family is separate from the ledger's, so audit writes never
//! contend with stock movements.

use crate::{
    chain::{self, chain_hash, ChainReport, GENESIS_HASH},
    error::{Error, Result},
    event::{EventPayload, OutboxEvent},
    metrics::Metrics,
    storage::Storage,
    types::{AuditEntry, AuditEntrySpec, VenueId},
};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Append-only audit log over hash-chained per-venue streams
pub struct AuditLog {
    storage: Arc<Storage>,
    metrics: Metrics,
    append_locks: DashMap<VenueId, Arc<Mutex<()>>>,
}

impl AuditLog {
    /// Create an audit log over opened storage
    pub fn new(storage: Arc<Storage>, metrics: Metrics) -> Self {
        Self {
            storage,
            metrics,
            append_locks: DashMap::new(),
        }
    }

    fn venue_lock(&self, venue: &VenueId) -> Arc<Mutex<()>> {
        self.append_locks
            .entry(venue.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Append an audit record.
    ///
    /// Duplicate request id returns the previously stored entry without
    /// appending or emitting.
    pub async fn append(&self, spec: AuditEntrySpec) -> Result<AuditEntry> {
        spec.validate()?;

        let now = Utc::now();
        let occurred_at = spec.occurred_at.unwrap_or(now);

        let lock = self.venue_lock(&spec.venue);
        let _guard = lock.lock().await;

        if let Some(request_id) = &spec.request_id {
            if let Some(existing) = self
                .storage
                .audit_entry_by_request(&spec.venue, request_id)?
            {
                self.metrics.record_duplicate();
                tracing::info!(
                    venue = %spec.venue,
                    request_id = %request_id,
                    sequence = existing.sequence,
                    "Duplicate request id, returning stored audit entry"
                );
                return Ok(existing);
            }
        }

        let head = self.storage.audit_head(&spec.venue)?;
        let (sequence, prev_hash) = match &head {
            Some(head) => (head.sequence + 1, head.entry_hash.clone()),
            None => (1, GENESIS_HASH.to_string()),
        };

        let mut entry = AuditEntry {
            venue: spec.venue.clone(),
            sequence,
            actor: spec.actor.clone(),
            action: spec.action.clone(),
            resource_kind: spec.resource_kind.clone(),
            resource_id: spec.resource_id.clone(),
            detail: spec.detail.clone(),
            request_id: spec.request_id.clone(),
            occurred_at,
            recorded_at: now,
            prev_hash: prev_hash.clone(),
            entry_hash: String::new(),
        };
        entry.entry_hash = chain_hash(&prev_hash, &entry.canonical_payload());

        let recorded = OutboxEvent::new(&EventPayload::AuditRecordedV1 {
            venue: spec.venue.clone(),
            sequence,
            action: spec.action.clone(),
            resource_kind: spec.resource_kind.clone(),
            resource_id: spec.resource_id.clone(),
            actor: spec.actor.clone(),
        })?;
        let events = [recorded];

        match self
            .storage
            .append_audit_atomic(&entry, &events, head.as_ref())
        {
            Ok(()) => {}
            Err(err @ Error::ChainRace { .. }) => {
                self.metrics.record_chain_race();
                tracing::warn!(venue = %spec.venue, sequence, "Audit head moved during append");
                return Err(err);
            }
            Err(err) => return Err(err),
        }

        self.metrics.record_audit_append(events.len());
        tracing::info!(
            venue = %spec.venue,
            sequence,
            actor = %spec.actor,
            action = %spec.action,
            resource_kind = %spec.resource_kind,
            resource_id = %spec.resource_id,
            "Appended audit entry"
        );

        Ok(entry)
    }

    /// Audit records for a venue, newest first
    pub fn history(
        &self,
        venue: &VenueId,
        limit: usize,
        before_sequence: Option<u64>,
    ) -> Result<Vec<AuditEntry>> {
        self.storage.audit_history(venue, limit, before_sequence)
    }

    /// Fetch one entry by sequence
    pub fn entry(&self, venue: &VenueId, sequence: u64) -> Result<Option<AuditEntry>> {
        self.storage.audit_entry(venue, sequence)
    }

    /// Recompute the venue's whole audit chain
    pub fn verify(&self, venue: &VenueId) -> Result<ChainReport> {
        let entries = self.storage.audit_entries(venue)?;
        let report = chain::verify(&entries);
        self.metrics.record_verification();
        if !report.ok {
            tracing::error!(
                venue = %venue,
                first_bad_index = report.first_bad_index,
                "Audit chain verification failed"
            );
        }
        Ok(report)
    }
}
