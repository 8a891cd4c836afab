//! Brigade Stock Core
//!
//! Append-only stock ledger and audit log with hash-chained streams and a
//! transactional outbox.
//!
//! # Architecture
//!
//! - **Append-only**: ledger and audit entries are never updated or deleted
//! - **Hash chains**: every entry commits to its predecessor, per venue
//! - **Transactional outbox**: events land in the same batch as the write
//!   that caused them
//! - **Per-venue serialization**: appends take an async lock per venue, so
//!   sequences and prev-hashes are race-free
//!
//! # Invariants
//!
//! - Balance: on-hand equals the signed sum of all ledger entries
//! - Tamper evidence: any stored mutation breaks hash recomputation
//! - Exactly-once effect: at-least-once dispatch plus guarded upserts

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod audit;
pub mod canonical;
pub mod chain;
pub mod config;
pub mod error;
pub mod event;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod storage;
pub mod types;

// Re-exports
pub use audit::AuditLog;
pub use chain::{ChainRecord, ChainReport, GENESIS_HASH};
pub use config::CoreConfig;
pub use error::{Error, Result};
pub use event::{DeadLetter, EventPayload, OutboxEvent, Topic, SCHEMA_V1};
pub use ledger::StockLedger;
pub use metrics::Metrics;
pub use storage::{ChainHead, Storage, StorageStats};
pub use types::{
    ActorId, AuditEntry, AuditEntrySpec, ChainStatus, ChainStream, IntegrityFinding, ItemBalance,
    ItemId, JobHeartbeat, HeartbeatStatus, LedgerEntry, LedgerEntrySpec, LotId,
    NegativeStockPolicy, Severity, SourceRef, StockAction, Unit, VenueId,
};
