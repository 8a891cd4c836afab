//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `ledger` - Append-only stock entries (key: venue | seq)
//! - `ledger_source_idx` - Unique source identity (key: venue | kind | id | item | action)
//! - `ledger_request_idx` - Request-id idempotency (key: venue | request_id)
//! - `ledger_item_idx` - Per-item history (key: venue | item | seq)
//! - `ledger_heads` - Chain heads (key: venue)
//! - `balances` - Running signed sums (key: venue | item)
//! - `audit` - Append-only audit entries (key: venue | seq)
//! - `audit_request_idx` - Request-id idempotency (key: venue | request_id)
//! - `audit_heads` - Chain heads (key: venue)
//! - `outbox` - Event envelopes (key: event_id, UUIDv7 so key order is creation order)
//! - `outbox_pending` - Unconsumed event ids (key: event_id)
//! - `dlq` - Dead letters (key: event_id)
//! - `read_models` - Projection records (key: venue | model | record)
//! - `heartbeats` - Job liveness (key: job_key)
//! - `findings` - Integrity findings (key: finding_id)
//! - `chain_status` - Last verification result (key: venue | stream)
//!
//! Every composite write (append plus indexes plus events) goes through a
//! single `WriteBatch`; there are no partial appends.

use crate::{
    config::CoreConfig,
    error::{Error, Result},
    event::{DeadLetter, OutboxEvent},
    types::{
        AuditEntry, ChainStatus, ChainStream, IntegrityFinding, ItemBalance, ItemId, JobHeartbeat,
        LedgerEntry, SourceRef, StockAction, VenueId,
    },
};
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode,
    Options, WriteBatch, DB,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_LEDGER: &str = "ledger";
const CF_LEDGER_SOURCE_IDX: &str = "ledger_source_idx";
const CF_LEDGER_REQUEST_IDX: &str = "ledger_request_idx";
const CF_LEDGER_ITEM_IDX: &str = "ledger_item_idx";
const CF_LEDGER_HEADS: &str = "ledger_heads";
const CF_BALANCES: &str = "balances";
const CF_AUDIT: &str = "audit";
const CF_AUDIT_REQUEST_IDX: &str = "audit_request_idx";
const CF_AUDIT_HEADS: &str = "audit_heads";
const CF_OUTBOX: &str = "outbox";
const CF_OUTBOX_PENDING: &str = "outbox_pending";
const CF_DLQ: &str = "dlq";
const CF_READ_MODELS: &str = "read_models";
const CF_HEARTBEATS: &str = "heartbeats";
const CF_FINDINGS: &str = "findings";
const CF_CHAIN_STATUS: &str = "chain_status";

const ALL_CFS: &[&str] = &[
    CF_LEDGER,
    CF_LEDGER_SOURCE_IDX,
    CF_LEDGER_REQUEST_IDX,
    CF_LEDGER_ITEM_IDX,
    CF_LEDGER_HEADS,
    CF_BALANCES,
    CF_AUDIT,
    CF_AUDIT_REQUEST_IDX,
    CF_AUDIT_HEADS,
    CF_OUTBOX,
    CF_OUTBOX_PENDING,
    CF_DLQ,
    CF_READ_MODELS,
    CF_HEARTBEATS,
    CF_FINDINGS,
    CF_CHAIN_STATUS,
];

/// Key separator; identifier validation keeps it out of segments
const SEP: u8 = b'|';

/// The persisted head of one hash-chained stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    /// Sequence of the newest entry
    pub sequence: u64,
    /// Hash of the newest entry
    pub entry_hash: String,
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create the database
    pub fn open(config: &CoreConfig) -> Result<Self> {
        Self::open_at(&config.data_dir, config)
    }

    /// Open or create the database at an explicit path
    pub fn open_at(path: &Path, config: &CoreConfig) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(config.store.create_if_missing);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.store.max_open_files);
        db_opts.set_write_buffer_size(config.store.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.store.max_background_jobs);

        // Universal compaction for the append-heavy streams
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name)))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(
            path = %path.display(),
            column_families = ALL_CFS.len(),
            "Opened RocksDB"
        );

        Ok(Self { db: Arc::new(db) })
    }

    fn cf_options(name: &str) -> Options {
        let mut opts = Options::default();
        match name {
            // Streams are written once and scanned; compress hard
            CF_LEDGER | CF_AUDIT | CF_OUTBOX | CF_DLQ => {
                opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
            }
            // Point-lookup indexes benefit from bloom filters
            CF_LEDGER_SOURCE_IDX | CF_LEDGER_REQUEST_IDX | CF_AUDIT_REQUEST_IDX => {
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                let mut block_opts = rocksdb::BlockBasedOptions::default();
                block_opts.set_bloom_filter(10.0, false);
                opts.set_block_based_table_factory(&block_opts);
            }
            _ => {
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
            }
        }
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Key helpers

    fn seq_key(venue: &VenueId, sequence: u64) -> Vec<u8> {
        let mut key = venue.as_str().as_bytes().to_vec();
        key.push(SEP);
        key.extend_from_slice(&sequence.to_be_bytes());
        key
    }

    fn venue_prefix(venue: &VenueId) -> Vec<u8> {
        let mut key = venue.as_str().as_bytes().to_vec();
        key.push(SEP);
        key
    }

    fn join_key(segments: &[&str]) -> Vec<u8> {
        let mut key = Vec::new();
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                key.push(SEP);
            }
            key.extend_from_slice(segment.as_bytes());
        }
        key
    }

    fn source_idx_key(
        venue: &VenueId,
        source: &SourceRef,
        item: &ItemId,
        action: StockAction,
    ) -> Vec<u8> {
        Self::join_key(&[
            venue.as_str(),
            &source.kind,
            &source.id,
            item.as_str(),
            action.as_str(),
        ])
    }

    fn item_idx_key(venue: &VenueId, item: &ItemId, sequence: u64) -> Vec<u8> {
        let mut key = Self::join_key(&[venue.as_str(), item.as_str()]);
        key.push(SEP);
        key.extend_from_slice(&sequence.to_be_bytes());
        key
    }

    fn item_idx_prefix(venue: &VenueId, item: &ItemId) -> Vec<u8> {
        let mut key = Self::join_key(&[venue.as_str(), item.as_str()]);
        key.push(SEP);
        key
    }

    fn read_model_prefix(venue: &VenueId, model: &str) -> Vec<u8> {
        let mut key = Self::join_key(&[venue.as_str(), model]);
        key.push(SEP);
        key
    }

    fn read_model_key(venue: &VenueId, model: &str, record: &str) -> Vec<u8> {
        let mut key = Self::read_model_prefix(venue, model);
        key.extend_from_slice(record.as_bytes());
        key
    }

    /// Smallest key strictly greater than every key sharing `prefix`.
    /// Empty when the prefix is all 0xFF.
    fn prefix_upper_bound(prefix: &[u8]) -> Vec<u8> {
        let mut bound = prefix.to_vec();
        while let Some(last) = bound.last_mut() {
            if *last < 0xFF {
                *last += 1;
                return bound;
            }
            bound.pop();
        }
        bound
    }

    // Ledger operations

    /// Read the chain head for a venue's ledger stream
    pub fn ledger_head(&self, venue: &VenueId) -> Result<Option<ChainHead>> {
        let cf = self.cf_handle(CF_LEDGER_HEADS)?;
        match self.db.get_cf(&cf, venue.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Fetch one ledger entry
    pub fn ledger_entry(&self, venue: &VenueId, sequence: u64) -> Result<Option<LedgerEntry>> {
        let cf = self.cf_handle(CF_LEDGER)?;
        match self.db.get_cf(&cf, Self::seq_key(venue, sequence))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Overwrite one stored entry in place, without touching indexes,
    /// heads, or the balance record.
    ///
    /// Normal writes go through [`Storage::append_ledger_atomic`]; this
    /// exists for corruption drills and repair tooling.
    pub fn overwrite_ledger_entry(&self, entry: &LedgerEntry) -> Result<()> {
        let cf = self.cf_handle(CF_LEDGER)?;
        self.db.put_cf(
            &cf,
            Self::seq_key(&entry.venue, entry.sequence),
            bincode::serialize(entry)?,
        )?;
        Ok(())
    }

    /// Look up an entry by its source identity
    pub fn ledger_entry_by_source(
        &self,
        venue: &VenueId,
        source: &SourceRef,
        item: &ItemId,
        action: StockAction,
    ) -> Result<Option<LedgerEntry>> {
        let cf = self.cf_handle(CF_LEDGER_SOURCE_IDX)?;
        let key = Self::source_idx_key(venue, source, item, action);
        match self.db.get_cf(&cf, &key)? {
            Some(bytes) => {
                let sequence = decode_sequence(&bytes)?;
                self.ledger_entry(venue, sequence)
            }
            None => Ok(None),
        }
    }

    /// Look up an entry by request id
    pub fn ledger_entry_by_request(
        &self,
        venue: &VenueId,
        request_id: &str,
    ) -> Result<Option<LedgerEntry>> {
        let cf = self.cf_handle(CF_LEDGER_REQUEST_IDX)?;
        let key = Self::join_key(&[venue.as_str(), request_id]);
        match self.db.get_cf(&cf, &key)? {
            Some(bytes) => {
                let sequence = decode_sequence(&bytes)?;
                self.ledger_entry(venue, sequence)
            }
            None => Ok(None),
        }
    }

    /// Commit a ledger entry, its indexes, the balance record, and the
    /// outbox events it produces in one atomic write.
    ///
    /// The caller holds the per-venue append lock; the head comparison
    /// catches writers that bypassed it and surfaces a retryable race.
    pub fn append_ledger_atomic(
        &self,
        entry: &LedgerEntry,
        balance: &ItemBalance,
        events: &[OutboxEvent],
        expected_head: Option<&ChainHead>,
    ) -> Result<()> {
        let current = self.ledger_head(&entry.venue)?;
        if current.as_ref() != expected_head {
            return Err(Error::ChainRace {
                venue: entry.venue.to_string(),
                expected_sequence: entry.sequence,
            });
        }

        let mut batch = WriteBatch::default();

        let cf_ledger = self.cf_handle(CF_LEDGER)?;
        batch.put_cf(
            &cf_ledger,
            Self::seq_key(&entry.venue, entry.sequence),
            bincode::serialize(entry)?,
        );

        let cf_source = self.cf_handle(CF_LEDGER_SOURCE_IDX)?;
        batch.put_cf(
            &cf_source,
            Self::source_idx_key(&entry.venue, &entry.source, &entry.item, entry.action),
            entry.sequence.to_be_bytes(),
        );

        if let Some(request_id) = &entry.request_id {
            let cf_request = self.cf_handle(CF_LEDGER_REQUEST_IDX)?;
            batch.put_cf(
                &cf_request,
                Self::join_key(&[entry.venue.as_str(), request_id]),
                entry.sequence.to_be_bytes(),
            );
        }

        let cf_item = self.cf_handle(CF_LEDGER_ITEM_IDX)?;
        batch.put_cf(
            &cf_item,
            Self::item_idx_key(&entry.venue, &entry.item, entry.sequence),
            b"",
        );

        let cf_heads = self.cf_handle(CF_LEDGER_HEADS)?;
        let head = ChainHead {
            sequence: entry.sequence,
            entry_hash: entry.entry_hash.clone(),
        };
        batch.put_cf(
            &cf_heads,
            entry.venue.as_str().as_bytes(),
            bincode::serialize(&head)?,
        );

        let cf_balances = self.cf_handle(CF_BALANCES)?;
        batch.put_cf(
            &cf_balances,
            Self::join_key(&[entry.venue.as_str(), entry.item.as_str()]),
            bincode::serialize(balance)?,
        );

        self.stage_events(&mut batch, events)?;

        self.db.write(batch)?;
        Ok(())
    }

    /// Scan ledger entries in sequence order, starting after `after_sequence`
    pub fn ledger_entries_after(
        &self,
        venue: &VenueId,
        after_sequence: u64,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let cf = self.cf_handle(CF_LEDGER)?;
        let prefix = Self::venue_prefix(venue);
        let start = Self::seq_key(venue, after_sequence.saturating_add(1));

        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) || entries.len() >= limit {
                break;
            }
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(entries)
    }

    /// All ledger entries of a venue in sequence order
    pub fn ledger_entries(&self, venue: &VenueId) -> Result<Vec<LedgerEntry>> {
        self.ledger_entries_after(venue, 0, usize::MAX)
    }

    /// Per-item entries newest-first, optionally starting below a sequence
    pub fn ledger_history(
        &self,
        venue: &VenueId,
        item: &ItemId,
        limit: usize,
        before_sequence: Option<u64>,
    ) -> Result<Vec<LedgerEntry>> {
        let sequences =
            self.item_sequences_desc(venue, item, limit, before_sequence)?;
        let mut entries = Vec::with_capacity(sequences.len());
        for sequence in sequences {
            if let Some(entry) = self.ledger_entry(venue, sequence)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Most recent ledger sequences for an item, newest first
    pub fn item_sequences_desc(
        &self,
        venue: &VenueId,
        item: &ItemId,
        limit: usize,
        before_sequence: Option<u64>,
    ) -> Result<Vec<u64>> {
        let cf = self.cf_handle(CF_LEDGER_ITEM_IDX)?;
        let prefix = Self::item_idx_prefix(venue, item);

        let start = match before_sequence {
            Some(0) => return Ok(Vec::new()),
            Some(bound) => {
                let mut key = prefix.clone();
                key.extend_from_slice(&(bound - 1).to_be_bytes());
                key
            }
            None => Self::prefix_upper_bound(&prefix),
        };

        let mode = if start.is_empty() {
            IteratorMode::End
        } else {
            IteratorMode::From(&start, Direction::Reverse)
        };

        let mut sequences = Vec::new();
        for item_result in self.db.iterator_cf(&cf, mode) {
            let (key, _) = item_result?;
            if !key.starts_with(&prefix) {
                break;
            }
            if sequences.len() >= limit {
                break;
            }
            sequences.push(decode_sequence(&key[prefix.len()..])?);
        }
        Ok(sequences)
    }

    /// Read the running balance record for an item
    pub fn item_balance(&self, venue: &VenueId, item: &ItemId) -> Result<Option<ItemBalance>> {
        let cf = self.cf_handle(CF_BALANCES)?;
        let key = Self::join_key(&[venue.as_str(), item.as_str()]);
        match self.db.get_cf(&cf, &key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Venues that have at least one ledger entry
    pub fn ledger_venues(&self) -> Result<Vec<VenueId>> {
        let cf = self.cf_handle(CF_LEDGER_HEADS)?;
        let mut venues = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            let name = String::from_utf8(key.to_vec())
                .map_err(|_| Error::Storage("non-utf8 venue key".to_string()))?;
            venues.push(VenueId::new(name));
        }
        Ok(venues)
    }

    // Audit operations

    /// Read the chain head for a venue's audit stream
    pub fn audit_head(&self, venue: &VenueId) -> Result<Option<ChainHead>> {
        let cf = self.cf_handle(CF_AUDIT_HEADS)?;
        match self.db.get_cf(&cf, venue.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Fetch one audit entry
    pub fn audit_entry(&self, venue: &VenueId, sequence: u64) -> Result<Option<AuditEntry>> {
        let cf = self.cf_handle(CF_AUDIT)?;
        match self.db.get_cf(&cf, Self::seq_key(venue, sequence))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Look up an audit entry by request id
    pub fn audit_entry_by_request(
        &self,
        venue: &VenueId,
        request_id: &str,
    ) -> Result<Option<AuditEntry>> {
        let cf = self.cf_handle(CF_AUDIT_REQUEST_IDX)?;
        let key = Self::join_key(&[venue.as_str(), request_id]);
        match self.db.get_cf(&cf, &key)? {
            Some(bytes) => {
                let sequence = decode_sequence(&bytes)?;
                self.audit_entry(venue, sequence)
            }
            None => Ok(None),
        }
    }

    /// Commit an audit entry, its request index, and its outbox events in
    /// one atomic write. Same head comparison as the ledger append.
    pub fn append_audit_atomic(
        &self,
        entry: &AuditEntry,
        events: &[OutboxEvent],
        expected_head: Option<&ChainHead>,
    ) -> Result<()> {
        let current = self.audit_head(&entry.venue)?;
        if current.as_ref() != expected_head {
            return Err(Error::ChainRace {
                venue: entry.venue.to_string(),
                expected_sequence: entry.sequence,
            });
        }

        let mut batch = WriteBatch::default();

        let cf_audit = self.cf_handle(CF_AUDIT)?;
        batch.put_cf(
            &cf_audit,
            Self::seq_key(&entry.venue, entry.sequence),
            bincode::serialize(entry)?,
        );

        if let Some(request_id) = &entry.request_id {
            let cf_request = self.cf_handle(CF_AUDIT_REQUEST_IDX)?;
            batch.put_cf(
                &cf_request,
                Self::join_key(&[entry.venue.as_str(), request_id]),
                entry.sequence.to_be_bytes(),
            );
        }

        let cf_heads = self.cf_handle(CF_AUDIT_HEADS)?;
        let head = ChainHead {
            sequence: entry.sequence,
            entry_hash: entry.entry_hash.clone(),
        };
        batch.put_cf(
            &cf_heads,
            entry.venue.as_str().as_bytes(),
            bincode::serialize(&head)?,
        );

        self.stage_events(&mut batch, events)?;

        self.db.write(batch)?;
        Ok(())
    }

    /// All audit entries of a venue in sequence order
    pub fn audit_entries(&self, venue: &VenueId) -> Result<Vec<AuditEntry>> {
        let cf = self.cf_handle(CF_AUDIT)?;
        let prefix = Self::venue_prefix(venue);

        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(entries)
    }

    /// Audit entries newest-first, optionally starting below a sequence
    pub fn audit_history(
        &self,
        venue: &VenueId,
        limit: usize,
        before_sequence: Option<u64>,
    ) -> Result<Vec<AuditEntry>> {
        let cf = self.cf_handle(CF_AUDIT)?;
        let prefix = Self::venue_prefix(venue);

        let start = match before_sequence {
            Some(0) => return Ok(Vec::new()),
            Some(bound) => Self::seq_key(venue, bound - 1),
            None => Self::prefix_upper_bound(&prefix),
        };

        let mode = if start.is_empty() {
            IteratorMode::End
        } else {
            IteratorMode::From(&start, Direction::Reverse)
        };

        let mut entries = Vec::new();
        for item in self.db.iterator_cf(&cf, mode) {
            let (key, value) = item?;
            if !key.starts_with(&prefix) || entries.len() >= limit {
                break;
            }
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(entries)
    }

    // Outbox operations

    fn stage_events(&self, batch: &mut WriteBatch, events: &[OutboxEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let cf_outbox = self.cf_handle(CF_OUTBOX)?;
        let cf_pending = self.cf_handle(CF_OUTBOX_PENDING)?;
        for event in events {
            let key = event.event_id.as_bytes().to_vec();
            batch.put_cf(&cf_outbox, &key, bincode::serialize(event)?);
            batch.put_cf(&cf_pending, &key, b"");
        }
        Ok(())
    }

    /// Insert pending events outside an append (standalone emit)
    pub fn insert_events(&self, events: &[OutboxEvent]) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_events(&mut batch, events)?;
        self.db.write(batch)?;
        Ok(())
    }

    /// Fetch one event envelope
    pub fn outbox_event(&self, event_id: Uuid) -> Result<Option<OutboxEvent>> {
        let cf = self.cf_handle(CF_OUTBOX)?;
        match self.db.get_cf(&cf, event_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Overwrite an event envelope (claim bookkeeping, failure records)
    pub fn update_event(&self, event: &OutboxEvent) -> Result<()> {
        let cf = self.cf_handle(CF_OUTBOX)?;
        self.db
            .put_cf(&cf, event.event_id.as_bytes(), bincode::serialize(event)?)?;
        Ok(())
    }

    /// Claim an event: bump the attempt count and push out the visibility
    /// horizon, conditional on the attempt count the claimer saw.
    ///
    /// Returns the claimed envelope, or None if the event was consumed or
    /// claimed by someone else in the meantime.
    pub fn claim_event(
        &self,
        event_id: Uuid,
        expected_attempts: u32,
        next_visible_at: DateTime<Utc>,
    ) -> Result<Option<OutboxEvent>> {
        let mut event = match self.outbox_event(event_id)? {
            Some(event) => event,
            None => return Ok(None),
        };
        if event.consumed_at.is_some() || event.attempts != expected_attempts {
            return Ok(None);
        }
        event.attempts += 1;
        event.next_visible_at = Some(next_visible_at);
        self.update_event(&event)?;
        Ok(Some(event))
    }

    /// Mark an event consumed and drop it from the pending index
    pub fn mark_consumed(&self, event: &OutboxEvent, at: DateTime<Utc>) -> Result<OutboxEvent> {
        let mut consumed = event.clone();
        consumed.consumed_at = Some(at);
        consumed.next_visible_at = None;

        let mut batch = WriteBatch::default();
        let cf_outbox = self.cf_handle(CF_OUTBOX)?;
        let cf_pending = self.cf_handle(CF_OUTBOX_PENDING)?;
        let key = event.event_id.as_bytes().to_vec();
        batch.put_cf(&cf_outbox, &key, bincode::serialize(&consumed)?);
        batch.delete_cf(&cf_pending, &key);
        self.db.write(batch)?;
        Ok(consumed)
    }

    /// Move an event to the dead-letter store.
    ///
    /// Writes the DLQ record, sets consumed-at on the original, and drops
    /// it from the pending index atomically.
    pub fn move_to_dlq(&self, dead: &DeadLetter) -> Result<()> {
        let mut event = dead.event.clone();
        event.consumed_at = Some(dead.moved_at);
        event.next_visible_at = None;

        let mut batch = WriteBatch::default();
        let key = event.event_id.as_bytes().to_vec();

        let cf_dlq = self.cf_handle(CF_DLQ)?;
        batch.put_cf(&cf_dlq, &key, bincode::serialize(dead)?);

        let cf_outbox = self.cf_handle(CF_OUTBOX)?;
        batch.put_cf(&cf_outbox, &key, bincode::serialize(&event)?);

        let cf_pending = self.cf_handle(CF_OUTBOX_PENDING)?;
        batch.delete_cf(&cf_pending, &key);

        self.db.write(batch)?;
        Ok(())
    }

    /// Requeue an event: clear consumed-at, reset attempts, make it
    /// visible, and restore the pending index entry
    pub fn requeue_event(&self, event_id: Uuid) -> Result<Option<OutboxEvent>> {
        let mut event = match self.outbox_event(event_id)? {
            Some(event) => event,
            None => return Ok(None),
        };
        event.consumed_at = None;
        event.attempts = 0;
        event.last_error = None;
        event.next_visible_at = None;

        let mut batch = WriteBatch::default();
        let key = event.event_id.as_bytes().to_vec();
        let cf_outbox = self.cf_handle(CF_OUTBOX)?;
        batch.put_cf(&cf_outbox, &key, bincode::serialize(&event)?);
        let cf_pending = self.cf_handle(CF_OUTBOX_PENDING)?;
        batch.put_cf(&cf_pending, &key, b"");
        self.db.write(batch)?;
        Ok(Some(event))
    }

    /// Unconsumed events in creation order
    pub fn pending_events(&self) -> Result<Vec<OutboxEvent>> {
        let cf_pending = self.cf_handle(CF_OUTBOX_PENDING)?;
        let mut events = Vec::new();
        for item in self.db.iterator_cf(&cf_pending, IteratorMode::Start) {
            let (key, _) = item?;
            let event_id = decode_uuid(&key)?;
            if let Some(event) = self.outbox_event(event_id)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Number of unconsumed events (the outbox lag)
    pub fn pending_count(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_OUTBOX_PENDING)?;
        let mut count = 0u64;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Scan event envelopes in creation order, starting after `after`
    pub fn outbox_events_after(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>> {
        let cf = self.cf_handle(CF_OUTBOX)?;
        let mode = match &after {
            Some(id) => IteratorMode::From(id.as_bytes(), Direction::Forward),
            None => IteratorMode::Start,
        };

        let mut events = Vec::new();
        for item in self.db.iterator_cf(&cf, mode) {
            let (key, value) = item?;
            if let Some(id) = after {
                if key.as_ref() == id.as_bytes() {
                    continue;
                }
            }
            if events.len() >= limit {
                break;
            }
            events.push(bincode::deserialize(&value)?);
        }
        Ok(events)
    }

    // Dead-letter operations

    /// Fetch one dead letter
    pub fn dead_letter(&self, event_id: Uuid) -> Result<Option<DeadLetter>> {
        let cf = self.cf_handle(CF_DLQ)?;
        match self.db.get_cf(&cf, event_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Overwrite a dead letter (replay bookkeeping)
    pub fn update_dead_letter(&self, dead: &DeadLetter) -> Result<()> {
        let cf = self.cf_handle(CF_DLQ)?;
        self.db.put_cf(
            &cf,
            dead.event.event_id.as_bytes(),
            bincode::serialize(dead)?,
        )?;
        Ok(())
    }

    /// All dead letters in creation order of the original events
    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let cf = self.cf_handle(CF_DLQ)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(entries)
    }

    /// Number of dead letters
    pub fn dlq_count(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_DLQ)?;
        let mut count = 0u64;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    // Read-model operations

    /// Read one projection record
    pub fn read_model<T: DeserializeOwned>(
        &self,
        venue: &VenueId,
        model: &str,
        record: &str,
    ) -> Result<Option<T>> {
        let cf = self.cf_handle(CF_READ_MODELS)?;
        match self.db.get_cf(&cf, Self::read_model_key(venue, model, record))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Upsert one projection record
    pub fn put_read_model<T: Serialize>(
        &self,
        venue: &VenueId,
        model: &str,
        record: &str,
        value: &T,
    ) -> Result<()> {
        self.put_read_model_with_events(venue, model, record, value, &[])
    }

    /// Upsert one projection record and emit events in the same write.
    ///
    /// Projections that react to their own state change (negative-stock
    /// detection) stay transactional with the record they derive from.
    pub fn put_read_model_with_events<T: Serialize>(
        &self,
        venue: &VenueId,
        model: &str,
        record: &str,
        value: &T,
        events: &[OutboxEvent],
    ) -> Result<()> {
        let mut batch = WriteBatch::default();
        let cf = self.cf_handle(CF_READ_MODELS)?;
        batch.put_cf(
            &cf,
            Self::read_model_key(venue, model, record),
            bincode::serialize(value)?,
        );
        self.stage_events(&mut batch, events)?;
        self.db.write(batch)?;
        Ok(())
    }

    /// Delete one projection record
    pub fn delete_read_model(&self, venue: &VenueId, model: &str, record: &str) -> Result<()> {
        let cf = self.cf_handle(CF_READ_MODELS)?;
        self.db
            .delete_cf(&cf, Self::read_model_key(venue, model, record))?;
        Ok(())
    }

    /// All records of one projection for a venue
    pub fn read_model_records<T: DeserializeOwned>(
        &self,
        venue: &VenueId,
        model: &str,
    ) -> Result<Vec<(String, T)>> {
        let cf = self.cf_handle(CF_READ_MODELS)?;
        let prefix = Self::read_model_prefix(venue, model);

        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut records = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let record_key = String::from_utf8(key[prefix.len()..].to_vec())
                .map_err(|_| Error::Storage("non-utf8 record key".to_string()))?;
            records.push((record_key, bincode::deserialize(&value)?));
        }
        Ok(records)
    }

    /// Delete all records of one projection for a venue, returning the count
    pub fn truncate_read_model(&self, venue: &VenueId, model: &str) -> Result<u64> {
        let cf = self.cf_handle(CF_READ_MODELS)?;
        let prefix = Self::read_model_prefix(venue, model);

        let keys: Vec<Vec<u8>> = {
            let iter = self
                .db
                .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));
            let mut keys = Vec::new();
            for item in iter {
                let (key, _) = item?;
                if !key.starts_with(&prefix) {
                    break;
                }
                keys.push(key.to_vec());
            }
            keys
        };

        let mut batch = WriteBatch::default();
        for key in &keys {
            batch.delete_cf(&cf, key);
        }
        self.db.write(batch)?;
        Ok(keys.len() as u64)
    }

    // Heartbeats

    /// Write a job heartbeat
    pub fn put_heartbeat(&self, heartbeat: &JobHeartbeat) -> Result<()> {
        let cf = self.cf_handle(CF_HEARTBEATS)?;
        self.db.put_cf(
            &cf,
            heartbeat.job_key.as_bytes(),
            bincode::serialize(heartbeat)?,
        )?;
        Ok(())
    }

    /// Read a job heartbeat
    pub fn heartbeat(&self, job_key: &str) -> Result<Option<JobHeartbeat>> {
        let cf = self.cf_handle(CF_HEARTBEATS)?;
        match self.db.get_cf(&cf, job_key.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    // Integrity findings

    /// Persist an integrity finding
    pub fn put_finding(&self, finding: &IntegrityFinding) -> Result<()> {
        let cf = self.cf_handle(CF_FINDINGS)?;
        self.db.put_cf(
            &cf,
            finding.finding_id.as_bytes(),
            bincode::serialize(finding)?,
        )?;
        Ok(())
    }

    /// Most recent findings, newest first
    pub fn recent_findings(&self, limit: usize) -> Result<Vec<IntegrityFinding>> {
        let cf = self.cf_handle(CF_FINDINGS)?;
        let mut findings = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::End) {
            let (_, value) = item?;
            if findings.len() >= limit {
                break;
            }
            findings.push(bincode::deserialize(&value)?);
        }
        Ok(findings)
    }

    // Chain status

    /// Persist the result of a chain verification run
    pub fn put_chain_status(
        &self,
        venue: &VenueId,
        stream: ChainStream,
        status: &ChainStatus,
    ) -> Result<()> {
        let cf = self.cf_handle(CF_CHAIN_STATUS)?;
        let key = Self::join_key(&[venue.as_str(), stream.as_str()]);
        self.db.put_cf(&cf, &key, bincode::serialize(status)?)?;
        Ok(())
    }

    /// Read the last verification result for one stream
    pub fn chain_status(
        &self,
        venue: &VenueId,
        stream: ChainStream,
    ) -> Result<Option<ChainStatus>> {
        let cf = self.cf_handle(CF_CHAIN_STATUS)?;
        let key = Self::join_key(&[venue.as_str(), stream.as_str()]);
        match self.db.get_cf(&cf, &key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All recorded verification results
    pub fn chain_statuses(&self) -> Result<Vec<(VenueId, ChainStream, ChainStatus)>> {
        let cf = self.cf_handle(CF_CHAIN_STATUS)?;
        let mut statuses = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item?;
            let text = String::from_utf8(key.to_vec())
                .map_err(|_| Error::Storage("non-utf8 chain status key".to_string()))?;
            let (venue, stream) = text
                .rsplit_once('|')
                .ok_or_else(|| Error::Storage(format!("malformed chain status key: {}", text)))?;
            let stream = ChainStream::parse(stream)
                .ok_or_else(|| Error::Storage(format!("unknown stream in key: {}", text)))?;
            statuses.push((
                VenueId::new(venue),
                stream,
                bincode::deserialize(&value)?,
            ));
        }
        Ok(statuses)
    }

    // Statistics

    /// Storage statistics for operations tooling
    pub fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            ledger_entries: self.approximate_count(CF_LEDGER)?,
            audit_entries: self.approximate_count(CF_AUDIT)?,
            outbox_events: self.approximate_count(CF_OUTBOX)?,
            pending_events: self.pending_count()?,
            dlq_entries: self.dlq_count()?,
            read_model_records: self.approximate_count(CF_READ_MODELS)?,
            findings: self.approximate_count(CF_FINDINGS)?,
        })
    }

    fn approximate_count(&self, cf_name: &str) -> Result<u64> {
        let cf = self.cf_handle(cf_name)?;
        let count = self
            .db
            .property_int_value_cf(&cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(count)
    }
}

fn decode_sequence(bytes: &[u8]) -> Result<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Storage("malformed sequence bytes".to_string()))?;
    Ok(u64::from_be_bytes(array))
}

fn decode_uuid(bytes: &[u8]) -> Result<Uuid> {
    let array: [u8; 16] = bytes
        .try_into()
        .map_err(|_| Error::Storage("malformed uuid key".to_string()))?;
    Ok(Uuid::from_bytes(array))
}

/// Storage statistics
#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    /// Approximate ledger entry count across venues
    pub ledger_entries: u64,
    /// Approximate audit entry count across venues
    pub audit_entries: u64,
    /// Approximate total event count, consumed included
    pub outbox_events: u64,
    /// Exact unconsumed event count
    pub pending_events: u64,
    /// Exact dead-letter count
    pub dlq_entries: u64,
    /// Approximate projection record count
    pub read_model_records: u64,
    /// Approximate integrity finding count
    pub findings: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{chain_hash, GENESIS_HASH};
    use crate::event::EventPayload;
    use crate::types::{ActorId, Unit};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = CoreConfig::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn test_entry(venue: &str, sequence: u64, prev_hash: &str) -> LedgerEntry {
        let now = Utc::now();
        let mut entry = LedgerEntry {
            venue: VenueId::new(venue),
            sequence,
            item: ItemId::new("flour"),
            action: StockAction::In,
            quantity: Decimal::from(10),
            unit: Unit::Kilogram,
            lot: None,
            expiry: None,
            reason: "delivery".to_string(),
            source: SourceRef::new("grn", format!("G{}", sequence)),
            actor: ActorId::new("alice"),
            occurred_at: now,
            recorded_at: now,
            prev_hash: prev_hash.to_string(),
            entry_hash: String::new(),
            request_id: Some(format!("r{}", sequence)),
            movement_event_id: Uuid::now_v7(),
        };
        entry.entry_hash = chain_hash(prev_hash, &entry.canonical_payload());
        entry
    }

    fn balance_for(entry: &LedgerEntry, quantity: Decimal) -> ItemBalance {
        ItemBalance {
            quantity,
            unit: entry.unit,
            last_sequence: entry.sequence,
            updated_at: entry.recorded_at,
        }
    }

    fn movement_event(venue: &str, sequence: u64) -> OutboxEvent {
        OutboxEvent::new(&EventPayload::StockMovementV1 {
            venue: VenueId::new(venue),
            sequence,
            item: ItemId::new("flour"),
            action: StockAction::In,
            quantity: Decimal::from(10),
            unit: Unit::Kilogram,
            lot: None,
            expiry: None,
            reason: "delivery".to_string(),
            source: SourceRef::new("grn", format!("G{}", sequence)),
            actor: ActorId::new("alice"),
            occurred_at: Utc::now(),
            risk_tag: None,
        })
        .unwrap()
    }

    #[test]
    fn test_open_creates_column_families() {
        let (storage, _temp) = test_storage();
        for name in ALL_CFS {
            assert!(storage.db.cf_handle(name).is_some(), "missing {}", name);
        }
    }

    #[test]
    fn test_append_and_lookups() {
        let (storage, _temp) = test_storage();
        let venue = VenueId::new("V1");

        let entry = test_entry("V1", 1, GENESIS_HASH);
        let event = movement_event("V1", 1);
        let balance = balance_for(&entry, Decimal::from(10));

        storage
            .append_ledger_atomic(&entry, &balance, &[event.clone()], None)
            .unwrap();

        let head = storage.ledger_head(&venue).unwrap().unwrap();
        assert_eq!(head.sequence, 1);
        assert_eq!(head.entry_hash, entry.entry_hash);

        let by_source = storage
            .ledger_entry_by_source(&venue, &entry.source, &entry.item, entry.action)
            .unwrap()
            .unwrap();
        assert_eq!(by_source.sequence, 1);

        let by_request = storage
            .ledger_entry_by_request(&venue, "r1")
            .unwrap()
            .unwrap();
        assert_eq!(by_request.sequence, 1);

        let stored_balance = storage.item_balance(&venue, &entry.item).unwrap().unwrap();
        assert_eq!(stored_balance.quantity, Decimal::from(10));

        // The movement event landed in the same write
        let stored_event = storage.outbox_event(event.event_id).unwrap().unwrap();
        assert!(stored_event.is_pending());
        assert_eq!(storage.pending_count().unwrap(), 1);
    }

    #[test]
    fn test_append_detects_head_race() {
        let (storage, _temp) = test_storage();

        let first = test_entry("V1", 1, GENESIS_HASH);
        let balance = balance_for(&first, Decimal::from(10));
        storage
            .append_ledger_atomic(&first, &balance, &[], None)
            .unwrap();

        // A second append that still expects an empty stream loses
        let stale = test_entry("V1", 1, GENESIS_HASH);
        let err = storage
            .append_ledger_atomic(&stale, &balance, &[], None)
            .unwrap_err();
        assert!(matches!(err, Error::ChainRace { .. }));
    }

    #[test]
    fn test_history_newest_first() {
        let (storage, _temp) = test_storage();
        let venue = VenueId::new("V1");
        let item = ItemId::new("flour");

        let mut prev = GENESIS_HASH.to_string();
        let mut head = None;
        for sequence in 1..=5 {
            let entry = test_entry("V1", sequence, &prev);
            let balance = balance_for(&entry, Decimal::from(10 * sequence as i64));
            storage
                .append_ledger_atomic(&entry, &balance, &[], head.as_ref())
                .unwrap();
            prev = entry.entry_hash.clone();
            head = Some(ChainHead {
                sequence,
                entry_hash: entry.entry_hash.clone(),
            });
        }

        let history = storage.ledger_history(&venue, &item, 3, None).unwrap();
        let sequences: Vec<u64> = history.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![5, 4, 3]);

        let older = storage.ledger_history(&venue, &item, 10, Some(3)).unwrap();
        let sequences: Vec<u64> = older.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![2, 1]);

        let all = storage.ledger_entries(&venue).unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[test]
    fn test_event_lifecycle() {
        let (storage, _temp) = test_storage();

        let event = movement_event("V1", 1);
        storage.insert_events(&[event.clone()]).unwrap();
        assert_eq!(storage.pending_count().unwrap(), 1);

        // Claim bumps attempts and hides the event
        let visible_at = Utc::now() + chrono::Duration::seconds(60);
        let claimed = storage
            .claim_event(event.event_id, 0, visible_at)
            .unwrap()
            .unwrap();
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.next_visible_at, Some(visible_at));

        // A stale claim loses
        assert!(storage
            .claim_event(event.event_id, 0, visible_at)
            .unwrap()
            .is_none());

        let consumed = storage.mark_consumed(&claimed, Utc::now()).unwrap();
        assert!(consumed.consumed_at.is_some());
        assert_eq!(consumed.next_visible_at, None);
        assert_eq!(storage.pending_count().unwrap(), 0);

        // Consumed events cannot be claimed
        assert!(storage
            .claim_event(event.event_id, 1, visible_at)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_pending_order_is_creation_order() {
        let (storage, _temp) = test_storage();

        let first = movement_event("V1", 1);
        let second = movement_event("V1", 2);
        let third = movement_event("V2", 1);
        storage
            .insert_events(&[first.clone(), second.clone(), third.clone()])
            .unwrap();

        let pending = storage.pending_events().unwrap();
        let ids: Vec<Uuid> = pending.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![first.event_id, second.event_id, third.event_id]);
    }

    #[test]
    fn test_dlq_move_and_requeue() {
        let (storage, _temp) = test_storage();

        let event = movement_event("V1", 1);
        storage.insert_events(&[event.clone()]).unwrap();

        let mut poisoned = event.clone();
        poisoned.attempts = 8;
        poisoned.last_error = Some("handler refused".to_string());

        let dead = DeadLetter {
            event: poisoned,
            moved_at: Utc::now(),
            final_error: "handler refused".to_string(),
            consumer: "outbox-consumer".to_string(),
            replay_count: 0,
        };
        storage.move_to_dlq(&dead).unwrap();

        assert_eq!(storage.pending_count().unwrap(), 0);
        assert_eq!(storage.dlq_count().unwrap(), 1);
        let stored = storage.outbox_event(event.event_id).unwrap().unwrap();
        assert!(stored.consumed_at.is_some());

        let requeued = storage.requeue_event(event.event_id).unwrap().unwrap();
        assert_eq!(requeued.attempts, 0);
        assert!(requeued.consumed_at.is_none());
        assert_eq!(storage.pending_count().unwrap(), 1);
    }

    #[test]
    fn test_read_model_round_trip() {
        let (storage, _temp) = test_storage();
        let venue = VenueId::new("V1");

        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Record {
            total: u64,
        }

        storage
            .put_read_model(&venue, "kds_day_stats", "2026-03-01|grill|burger", &Record { total: 4 })
            .unwrap();
        storage
            .put_read_model(&venue, "kds_day_stats", "2026-03-01|grill|fries", &Record { total: 9 })
            .unwrap();

        let loaded: Record = storage
            .read_model(&venue, "kds_day_stats", "2026-03-01|grill|burger")
            .unwrap()
            .unwrap();
        assert_eq!(loaded, Record { total: 4 });

        let all: Vec<(String, Record)> =
            storage.read_model_records(&venue, "kds_day_stats").unwrap();
        assert_eq!(all.len(), 2);

        let removed = storage.truncate_read_model(&venue, "kds_day_stats").unwrap();
        assert_eq!(removed, 2);
        let empty: Option<Record> = storage
            .read_model(&venue, "kds_day_stats", "2026-03-01|grill|burger")
            .unwrap();
        assert!(empty.is_none());
    }

    #[test]
    fn test_heartbeat_round_trip() {
        let (storage, _temp) = test_storage();

        let heartbeat = JobHeartbeat {
            job_key: "outbox-consumer".to_string(),
            last_heartbeat_at: Utc::now(),
            last_success_at: Some(Utc::now()),
            status: crate::types::HeartbeatStatus::Ok,
            last_error: None,
        };
        storage.put_heartbeat(&heartbeat).unwrap();

        let loaded = storage.heartbeat("outbox-consumer").unwrap().unwrap();
        assert_eq!(loaded.status, crate::types::HeartbeatStatus::Ok);
        assert!(storage.heartbeat("other-job").unwrap().is_none());
    }

    #[test]
    fn test_findings_newest_first() {
        let (storage, _temp) = test_storage();

        for i in 0..3 {
            storage
                .put_finding(&IntegrityFinding {
                    finding_id: Uuid::now_v7(),
                    venue: VenueId::new("V1"),
                    code: "chain.broken".to_string(),
                    severity: crate::types::Severity::Critical,
                    detail: format!("finding {}", i),
                    detected_at: Utc::now(),
                })
                .unwrap();
        }

        let findings = storage.recent_findings(2).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].detail, "finding 2");
        assert_eq!(findings[1].detail, "finding 1");
    }

    #[test]
    fn test_chain_status_round_trip() {
        let (storage, _temp) = test_storage();
        let venue = VenueId::new("V1");

        let status = ChainStatus {
            ok: false,
            first_bad_index: Some(5),
            entries_checked: 9,
            verified_at: Utc::now(),
        };
        storage
            .put_chain_status(&venue, ChainStream::Ledger, &status)
            .unwrap();

        let loaded = storage
            .chain_status(&venue, ChainStream::Ledger)
            .unwrap()
            .unwrap();
        assert!(!loaded.ok);
        assert_eq!(loaded.first_bad_index, Some(5));

        let all = storage.chain_statuses().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, venue);
        assert_eq!(all[0].1, ChainStream::Ledger);
    }
}
