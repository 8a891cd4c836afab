//! Core types for the stock ledger and audit log
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for quantities)
//! - Hash-chained append-only streams

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Maximum length of any identifier segment
const MAX_ID_LEN: usize = 128;

/// Validate an identifier segment used in store keys.
///
/// Segments are joined with `|` in column-family keys, so the separator is
/// reserved. Control characters never belong in an id.
pub fn validate_segment(label: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", label)));
    }
    if value.len() > MAX_ID_LEN {
        return Err(Error::Validation(format!(
            "{} exceeds {} bytes",
            label, MAX_ID_LEN
        )));
    }
    if value.contains('|') {
        return Err(Error::Validation(format!(
            "{} must not contain '|': {}",
            label, value
        )));
    }
    if value.chars().any(|c| c.is_control()) {
        return Err(Error::Validation(format!(
            "{} contains control characters",
            label
        )));
    }
    Ok(())
}

/// Venue identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct VenueId(String);

impl VenueId {
    /// Create new venue ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the id against the key-segment rules
    pub fn validate(&self) -> Result<()> {
        validate_segment("venue", &self.0)
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inventory item identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ItemId(String);

impl ItemId {
    /// Create new item ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the id against the key-segment rules
    pub fn validate(&self) -> Result<()> {
        validate_segment("item", &self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Staff or system actor identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(String);

impl ActorId {
    /// Create new actor ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the id against the key-segment rules
    pub fn validate(&self) -> Result<()> {
        validate_segment("actor", &self.0)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stock lot identifier (batch of goods sharing an expiry)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LotId(String);

impl LotId {
    /// Create new lot ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the id against the key-segment rules
    pub fn validate(&self) -> Result<()> {
        validate_segment("lot", &self.0)
    }
}

impl fmt::Display for LotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stock movement direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StockAction {
    /// Goods received (delivery, transfer in, production)
    In,
    /// Goods consumed (sale, waste, transfer out)
    Out,
    /// Manual correction with a signed delta
    Adjust,
}

impl StockAction {
    /// Stable code used in keys and event payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            StockAction::In => "IN",
            StockAction::Out => "OUT",
            StockAction::Adjust => "ADJUST",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IN" => Some(StockAction::In),
            "OUT" => Some(StockAction::Out),
            "ADJUST" => Some(StockAction::Adjust),
            _ => None,
        }
    }
}

impl fmt::Display for StockAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Measurement unit for quantities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Unit {
    /// Grams
    Gram,
    /// Kilograms
    Kilogram,
    /// Milliliters
    Milliliter,
    /// Liters
    Liter,
    /// Discrete pieces
    Piece,
}

impl Unit {
    /// Stable code used in keys and payloads
    pub fn code(&self) -> &'static str {
        match self {
            Unit::Gram => "g",
            Unit::Kilogram => "kg",
            Unit::Milliliter => "ml",
            Unit::Liter => "l",
            Unit::Piece => "piece",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "g" => Some(Unit::Gram),
            "kg" => Some(Unit::Kilogram),
            "ml" => Some(Unit::Milliliter),
            "l" => Some(Unit::Liter),
            "piece" => Some(Unit::Piece),
            _ => None,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Negative-stock policy, configurable per venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegativeStockPolicy {
    /// Append and emit a warning event
    Allow,
    /// Append, emit a warning event, and tag the movement event
    Warn,
    /// Refuse the append
    Block,
}

impl NegativeStockPolicy {
    /// Stable code
    pub fn as_str(&self) -> &'static str {
        match self {
            NegativeStockPolicy::Allow => "allow",
            NegativeStockPolicy::Warn => "warn",
            NegativeStockPolicy::Block => "block",
        }
    }

    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Some(NegativeStockPolicy::Allow),
            "warn" => Some(NegativeStockPolicy::Warn),
            "block" => Some(NegativeStockPolicy::Block),
            _ => None,
        }
    }
}

impl fmt::Display for NegativeStockPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Originating domain object of a ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    /// Source kind ("order", "grn", "adjustment", ...)
    pub kind: String,
    /// Source document id within its kind
    pub id: String,
}

impl SourceRef {
    /// Create a source reference
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Check both segments against the key rules
    pub fn validate(&self) -> Result<()> {
        validate_segment("source kind", &self.kind)?;
        validate_segment("source id", &self.id)
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Which hash-chained stream an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainStream {
    /// Stock ledger entries
    Ledger,
    /// Audit entries
    Audit,
}

impl ChainStream {
    /// Stable code used in keys and findings
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainStream::Ledger => "ledger",
            ChainStream::Audit => "audit",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ledger" => Some(ChainStream::Ledger),
            "audit" => Some(ChainStream::Audit),
            _ => None,
        }
    }
}

impl fmt::Display for ChainStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable stock movement, hash-chained per venue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Venue owning this stream
    pub venue: VenueId,

    /// Position in the venue's total order (from 1)
    pub sequence: u64,

    /// Item moved
    pub item: ItemId,

    /// Movement direction
    pub action: StockAction,

    /// Signed quantity applied to the balance
    pub quantity: Decimal,

    /// Measurement unit
    pub unit: Unit,

    /// Lot the movement belongs to, if tracked
    pub lot: Option<LotId>,

    /// Expiry date of the lot, if known
    pub expiry: Option<NaiveDate>,

    /// Reason code ("sale", "waste", "stocktake", ...)
    pub reason: String,

    /// Domain object that caused the movement
    pub source: SourceRef,

    /// Actor who performed the operation
    pub actor: ActorId,

    /// When the movement happened in the real world
    pub occurred_at: DateTime<Utc>,

    /// When the entry was committed
    pub recorded_at: DateTime<Utc>,

    /// Hash of the previous entry ("genesis" for the first)
    pub prev_hash: String,

    /// SHA-256 over prev_hash and the canonical payload, lowercase hex
    pub entry_hash: String,

    /// Caller-supplied idempotency key
    pub request_id: Option<String>,

    /// Id of the stock.movement event committed with this entry
    pub movement_event_id: Uuid,
}

/// Input for [`LedgerEntry`] creation.
///
/// Quantities are positive magnitudes for IN and OUT; ADJUST takes the
/// signed delta as given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntrySpec {
    /// Venue to append to
    pub venue: VenueId,
    /// Item moved
    pub item: ItemId,
    /// Movement direction
    pub action: StockAction,
    /// Magnitude (IN/OUT) or signed delta (ADJUST)
    pub quantity: Decimal,
    /// Measurement unit
    pub unit: Unit,
    /// Lot, if tracked
    pub lot: Option<LotId>,
    /// Lot expiry, if known
    pub expiry: Option<NaiveDate>,
    /// Reason code
    pub reason: String,
    /// Originating domain object
    pub source: SourceRef,
    /// Acting staff member or system
    pub actor: ActorId,
    /// Idempotency key
    pub request_id: Option<String>,
    /// Real-world time of the movement; commit time when absent
    pub occurred_at: Option<DateTime<Utc>>,
}

impl LedgerEntrySpec {
    /// Signed quantity this spec applies to the balance.
    ///
    /// IN requires a positive magnitude and contributes it as-is, OUT
    /// requires a positive magnitude and negates it, ADJUST passes any
    /// non-zero signed value through.
    pub fn signed_quantity(&self) -> Result<Decimal> {
        if self.quantity.is_zero() {
            return Err(Error::Validation("quantity must not be zero".to_string()));
        }
        match self.action {
            StockAction::In => {
                if self.quantity.is_sign_negative() {
                    return Err(Error::Validation(
                        "IN quantity must be positive".to_string(),
                    ));
                }
                Ok(self.quantity)
            }
            StockAction::Out => {
                if self.quantity.is_sign_negative() {
                    return Err(Error::Validation(
                        "OUT quantity must be positive".to_string(),
                    ));
                }
                Ok(-self.quantity)
            }
            StockAction::Adjust => Ok(self.quantity),
        }
    }

    /// Validate all fields before an append is attempted
    pub fn validate(&self) -> Result<()> {
        self.venue.validate()?;
        self.item.validate()?;
        self.actor.validate()?;
        self.source.validate()?;
        if let Some(lot) = &self.lot {
            lot.validate()?;
        }
        validate_segment("reason", &self.reason)?;
        if let Some(request_id) = &self.request_id {
            validate_segment("request id", request_id)?;
        }
        if self.expiry.is_some() && self.lot.is_none() {
            return Err(Error::Validation(
                "expiry requires a lot id".to_string(),
            ));
        }
        self.signed_quantity()?;
        Ok(())
    }
}

/// Immutable audit record, hash-chained per venue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Venue owning this stream
    pub venue: VenueId,

    /// Position in the venue's audit order (from 1)
    pub sequence: u64,

    /// Actor who performed the action
    pub actor: ActorId,

    /// Dotted action key ("order.close", "stock.adjust", ...)
    pub action: String,

    /// Kind of the affected resource
    pub resource_kind: String,

    /// Id of the affected resource
    pub resource_id: String,

    /// Compact detail map
    pub detail: BTreeMap<String, String>,

    /// Caller-supplied idempotency key
    pub request_id: Option<String>,

    /// When the action happened
    pub occurred_at: DateTime<Utc>,

    /// When the entry was committed
    pub recorded_at: DateTime<Utc>,

    /// Hash of the previous entry ("genesis" for the first)
    pub prev_hash: String,

    /// SHA-256 over prev_hash and the canonical payload, lowercase hex
    pub entry_hash: String,
}

/// Input for [`AuditEntry`] creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntrySpec {
    /// Venue to append to
    pub venue: VenueId,
    /// Acting staff member or system
    pub actor: ActorId,
    /// Dotted action key
    pub action: String,
    /// Kind of the affected resource
    pub resource_kind: String,
    /// Id of the affected resource
    pub resource_id: String,
    /// Compact detail map
    pub detail: BTreeMap<String, String>,
    /// Idempotency key
    pub request_id: Option<String>,
    /// Real-world time of the action; commit time when absent
    pub occurred_at: Option<DateTime<Utc>>,
}

impl AuditEntrySpec {
    /// Validate all fields before an append is attempted
    pub fn validate(&self) -> Result<()> {
        self.venue.validate()?;
        self.actor.validate()?;
        validate_action_key(&self.action)?;
        validate_segment("resource kind", &self.resource_kind)?;
        validate_segment("resource id", &self.resource_id)?;
        if let Some(request_id) = &self.request_id {
            validate_segment("request id", request_id)?;
        }
        for (key, _) in &self.detail {
            validate_segment("detail key", key)?;
        }
        Ok(())
    }
}

/// Validate a dotted action key like `order.close`.
pub fn validate_action_key(key: &str) -> Result<()> {
    let segments: Vec<&str> = key.split('.').collect();
    if segments.len() < 2 {
        return Err(Error::Validation(format!(
            "action key must be dotted: {}",
            key
        )));
    }
    for segment in segments {
        if segment.is_empty()
            || !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::Validation(format!("malformed action key: {}", key)));
        }
    }
    Ok(())
}

/// Running signed sum per (venue, item), maintained in the append batch.
///
/// This is store-level state, transactional with the ledger; the on-hand
/// projection is the eventually consistent copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemBalance {
    /// Current signed sum of all entries for the item
    pub quantity: Decimal,
    /// Unit all entries for this item share
    pub unit: Unit,
    /// Sequence of the last entry applied
    pub last_sequence: u64,
    /// Commit time of the last entry applied
    pub updated_at: DateTime<Utc>,
}

/// Consumer liveness status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeartbeatStatus {
    /// Ticking normally
    Ok,
    /// Ticking but the last tick reported an error
    Warn,
    /// Shut down cleanly
    Stopped,
}

impl HeartbeatStatus {
    /// Stable code
    pub fn as_str(&self) -> &'static str {
        match self {
            HeartbeatStatus::Ok => "OK",
            HeartbeatStatus::Warn => "WARN",
            HeartbeatStatus::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for HeartbeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Periodic liveness record written by a background job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHeartbeat {
    /// Job identity ("outbox-consumer")
    pub job_key: String,
    /// Last tick time
    pub last_heartbeat_at: DateTime<Utc>,
    /// Last tick that completed without error
    pub last_success_at: Option<DateTime<Utc>>,
    /// Liveness status
    pub status: HeartbeatStatus,
    /// Error reported by the last failing tick
    pub last_error: Option<String>,
}

/// Severity of an integrity finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Informational
    Info,
    /// Needs attention
    Warning,
    /// Data integrity is compromised
    Critical,
}

impl Severity {
    /// Stable code
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of an integrity check, persisted for the health surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityFinding {
    /// Finding id (UUIDv7, time-ordered)
    pub finding_id: Uuid,
    /// Venue the finding concerns
    pub venue: VenueId,
    /// Machine-readable code ("chain.broken")
    pub code: String,
    /// Severity tag
    pub severity: Severity,
    /// Human-readable detail
    pub detail: String,
    /// When the check ran
    pub detected_at: DateTime<Utc>,
}

/// Persisted result of the last chain verification per (venue, stream)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStatus {
    /// Whether the whole stream recomputed cleanly
    pub ok: bool,
    /// First entry whose hash did not recompute
    pub first_bad_index: Option<u64>,
    /// Number of entries checked
    pub entries_checked: u64,
    /// When the verification ran
    pub verified_at: DateTime<Utc>,
}
