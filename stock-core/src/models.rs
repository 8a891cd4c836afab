//! Read-model record types
//!
//! Projection handlers own the update logic; the record structs live here
//! because they are persisted types, readable by anyone holding storage.
//! Every record carries the id of the last event applied to it, which is
//! the idempotence guard for at-least-once dispatch and replay.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ItemId, LotId, Unit};

/// Model key of the on-hand balance projection
pub const MODEL_ON_HAND: &str = "on_hand";
/// Model key of the daily kitchen stats projection
pub const MODEL_KDS_DAY_STATS: &str = "kds_day_stats";
/// Model key of the expiring-soon index
pub const MODEL_EXPIRING_SOON: &str = "expiring_soon";
/// Model key of the negative-stock diagnosis projection
pub const MODEL_NEGATIVE_DIAGNOSIS: &str = "negative_diagnosis";

/// All model keys, in rebuild order
pub const ALL_MODELS: &[&str] = &[
    MODEL_ON_HAND,
    MODEL_KDS_DAY_STATS,
    MODEL_EXPIRING_SOON,
    MODEL_NEGATIVE_DIAGNOSIS,
];

/// Projected on-hand balance per (venue, item). Record key: item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnHandRecord {
    /// Projected signed balance
    pub quantity: Decimal,
    /// Unit of the item's movements
    pub unit: Unit,
    /// Ledger sequence of the last movement applied
    pub last_sequence: u64,
    /// Guard: id of the last event applied
    pub last_applied_event_id: Uuid,
    /// When the record was last written
    pub updated_at: DateTime<Utc>,
}

/// Daily kitchen throughput per (venue, day, station, item).
/// Record key: `day|station|item`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KdsDayStats {
    /// Closed ticket lines
    pub count: u64,
    /// Sum of preparation times in milliseconds
    pub total_ms: u64,
    /// Fastest preparation in milliseconds
    pub fastest_ms: u64,
    /// Slowest preparation in milliseconds
    pub slowest_ms: u64,
    /// Guard: id of the last event applied
    pub last_applied_event_id: Uuid,
    /// When the record was last written
    pub updated_at: DateTime<Utc>,
}

/// Lot approaching its expiry date. Record key: `item|lot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpiringLot {
    /// Item the lot belongs to
    pub item: ItemId,
    /// Lot identifier
    pub lot: LotId,
    /// Expiry date of the lot
    pub expiry: NaiveDate,
    /// Guard: id of the last event applied
    pub last_applied_event_id: Uuid,
    /// When the record was last written
    pub updated_at: DateTime<Utc>,
}

/// Latest negative-stock diagnosis per (venue, item). Record key: item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegativeDiagnosis {
    /// Projected balance at detection time
    pub balance: Decimal,
    /// Most recent ledger sequences for the item, newest first
    pub recent_sequences: Vec<u64>,
    /// Causal hypothesis derived from the recent movement mix
    pub hypothesis: String,
    /// When the negative balance was observed
    pub detected_at: DateTime<Utc>,
    /// Guard: id of the last event applied
    pub last_applied_event_id: Uuid,
    /// When the record was last written
    pub updated_at: DateTime<Utc>,
}

/// Record key of a daily kitchen stats record
pub fn kds_record_key(day: NaiveDate, station: &str, item: &ItemId) -> String {
    format!("{}|{}|{}", day.format("%Y-%m-%d"), station, item)
}

/// Record key of an expiring-lot record
pub fn expiry_record_key(item: &ItemId, lot: &LotId) -> String {
    format!("{}|{}", item, lot)
}
