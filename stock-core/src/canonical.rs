//! Canonical serialization for hash chaining
//!
//! Producers and verifiers must agree byte-for-byte on the payload
//! representation or the chain is useless. The rules: map keys sorted
//! lexicographically, strings in NFC, decimals in fixed decimal form
//! (no exponent, no trailing zeros, no negative zero), timestamps as
//! RFC3339-UTC with microsecond precision.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use unicode_normalization::UnicodeNormalization;

use crate::types::{AuditEntry, LedgerEntry};

// Type tags keep the encoding self-delimiting; without them
// ("1","2") and ("12",) could collide.
const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_UINT: u8 = 0x03;
const TAG_DECIMAL: u8 = 0x04;
const TAG_TEXT: u8 = 0x05;
const TAG_TIMESTAMP: u8 = 0x06;
const TAG_MAP: u8 = 0x07;

/// A value that can appear in a canonical payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalValue {
    /// Absent optional field
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Unsigned integer (sequences)
    Uint(u64),
    /// Exact decimal quantity
    Decimal(Decimal),
    /// NFC-normalized text
    Text(String),
    /// UTC timestamp
    Timestamp(DateTime<Utc>),
    /// Nested map with sorted keys
    Map(CanonicalPayload),
}

impl CanonicalValue {
    /// Text value from any displayable input
    pub fn text(s: impl Into<String>) -> Self {
        CanonicalValue::Text(s.into())
    }

    /// Text when present, Null when absent
    pub fn opt_text(opt: Option<impl Into<String>>) -> Self {
        match opt {
            Some(s) => CanonicalValue::Text(s.into()),
            None => CanonicalValue::Null,
        }
    }
}

/// An ordered set of named values, the unit of chain hashing.
///
/// Keys are NFC-normalized on insertion so the sort order is defined on
/// the same representation the bytes carry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CanonicalPayload {
    fields: BTreeMap<String, CanonicalValue>,
}

impl CanonicalPayload {
    /// Create an empty payload
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, replacing any previous value for the key
    pub fn set(&mut self, key: &str, value: CanonicalValue) -> &mut Self {
        self.fields.insert(nfc(key), value);
        self
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the payload has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Deterministic byte representation
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = CanonicalWriter::new();
        writer.write_map(self);
        writer.finalize()
    }
}

/// Byte writer for canonical payloads
struct CanonicalWriter {
    buffer: Vec<u8>,
}

impl CanonicalWriter {
    fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn write_u32(&mut self, n: u32) {
        self.write_bytes(&n.to_be_bytes());
    }

    /// Length-prefixed NFC text
    fn write_text(&mut self, s: &str) {
        let normalized = nfc(s);
        let bytes = normalized.as_bytes();
        self.write_u32(bytes.len() as u32);
        self.write_bytes(bytes);
    }

    fn write_value(&mut self, value: &CanonicalValue) {
        match value {
            CanonicalValue::Null => self.write_bytes(&[TAG_NULL]),
            CanonicalValue::Bool(b) => {
                self.write_bytes(&[TAG_BOOL, u8::from(*b)]);
            }
            CanonicalValue::Int(n) => {
                self.write_bytes(&[TAG_INT]);
                self.write_bytes(&n.to_be_bytes());
            }
            CanonicalValue::Uint(n) => {
                self.write_bytes(&[TAG_UINT]);
                self.write_bytes(&n.to_be_bytes());
            }
            CanonicalValue::Decimal(d) => {
                self.write_bytes(&[TAG_DECIMAL]);
                self.write_text(&canonical_decimal(d));
            }
            CanonicalValue::Text(s) => {
                self.write_bytes(&[TAG_TEXT]);
                self.write_text(s);
            }
            CanonicalValue::Timestamp(ts) => {
                self.write_bytes(&[TAG_TIMESTAMP]);
                self.write_text(&canonical_timestamp(ts));
            }
            CanonicalValue::Map(map) => self.write_map(map),
        }
    }

    fn write_map(&mut self, map: &CanonicalPayload) {
        self.write_bytes(&[TAG_MAP]);
        self.write_u32(map.fields.len() as u32);
        // BTreeMap iteration order is the sorted key order
        for (key, value) in &map.fields {
            self.write_text(key);
            self.write_value(value);
        }
    }

    fn finalize(self) -> Vec<u8> {
        self.buffer
    }
}

/// NFC normalization, the single Unicode form of the chain
fn nfc(s: &str) -> String {
    s.nfc().collect()
}

/// Fixed decimal form: no exponent, no trailing zeros, `-0` collapses to `0`.
pub fn canonical_decimal(d: &Decimal) -> String {
    if d.is_zero() {
        return "0".to_string();
    }
    d.normalize().to_string()
}

/// RFC3339-UTC with microsecond precision and `Z` suffix
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl LedgerEntry {
    /// Payload fields covered by the entry hash.
    ///
    /// prev_hash and entry_hash are chain inputs and outputs, and the
    /// movement event id is transport metadata; everything else is in.
    pub fn canonical_payload(&self) -> CanonicalPayload {
        let mut payload = CanonicalPayload::new();
        payload
            .set("action", CanonicalValue::text(self.action.as_str()))
            .set("actor", CanonicalValue::text(self.actor.as_str()))
            .set(
                "expiry",
                CanonicalValue::opt_text(self.expiry.map(|d| d.format("%Y-%m-%d").to_string())),
            )
            .set("item", CanonicalValue::text(self.item.as_str()))
            .set(
                "lot",
                CanonicalValue::opt_text(self.lot.as_ref().map(|l| l.as_str())),
            )
            .set("occurred_at", CanonicalValue::Timestamp(self.occurred_at))
            .set("quantity", CanonicalValue::Decimal(self.quantity))
            .set("reason", CanonicalValue::text(&self.reason))
            .set("recorded_at", CanonicalValue::Timestamp(self.recorded_at))
            .set(
                "request_id",
                CanonicalValue::opt_text(self.request_id.as_deref()),
            )
            .set("sequence", CanonicalValue::Uint(self.sequence))
            .set("source_id", CanonicalValue::text(&self.source.id))
            .set("source_kind", CanonicalValue::text(&self.source.kind))
            .set("unit", CanonicalValue::text(self.unit.code()))
            .set("venue", CanonicalValue::text(self.venue.as_str()));
        payload
    }
}

impl AuditEntry {
    /// Payload fields covered by the entry hash
    pub fn canonical_payload(&self) -> CanonicalPayload {
        let mut detail = CanonicalPayload::new();
        for (key, value) in &self.detail {
            detail.set(key, CanonicalValue::text(value));
        }

        let mut payload = CanonicalPayload::new();
        payload
            .set("action", CanonicalValue::text(&self.action))
            .set("actor", CanonicalValue::text(self.actor.as_str()))
            .set("detail", CanonicalValue::Map(detail))
            .set("occurred_at", CanonicalValue::Timestamp(self.occurred_at))
            .set("recorded_at", CanonicalValue::Timestamp(self.recorded_at))
            .set(
                "request_id",
                CanonicalValue::opt_text(self.request_id.as_deref()),
            )
            .set("resource_id", CanonicalValue::text(&self.resource_id))
            .set("resource_kind", CanonicalValue::text(&self.resource_kind))
            .set("sequence", CanonicalValue::Uint(self.sequence))
            .set("venue", CanonicalValue::text(self.venue.as_str()));
        payload
    }
}
