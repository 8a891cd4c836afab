//! Hash chain primitive
//!
//! Each append-only stream (ledger or audit, one per venue) links entries
//! with `entry_hash = SHA-256(prev_hash || canonical(payload))`, lowercase
//! hex. Verification recomputes every link from the stream head and
//! reports the first discrepancy.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::canonical::CanonicalPayload;
use crate::types::{AuditEntry, LedgerEntry};

/// The prev-hash of the first entry in every stream
pub const GENESIS_HASH: &str = "genesis";

/// Compute the next hash in a chain
pub fn chain_hash(prev: &str, payload: &CanonicalPayload) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev.as_bytes());
    hasher.update(payload.to_bytes());
    hex::encode(hasher.finalize())
}

/// An entry that participates in a hash chain
pub trait ChainRecord {
    /// Stored hash of the predecessor
    fn prev_hash(&self) -> &str;
    /// Stored hash of this entry
    fn entry_hash(&self) -> &str;
    /// Fields covered by the hash
    fn canonical_payload(&self) -> CanonicalPayload;
}

impl ChainRecord for LedgerEntry {
    fn prev_hash(&self) -> &str {
        &self.prev_hash
    }

    fn entry_hash(&self) -> &str {
        &self.entry_hash
    }

    fn canonical_payload(&self) -> CanonicalPayload {
        LedgerEntry::canonical_payload(self)
    }
}

impl ChainRecord for AuditEntry {
    fn prev_hash(&self) -> &str {
        &self.prev_hash
    }

    fn entry_hash(&self) -> &str {
        &self.entry_hash
    }

    fn canonical_payload(&self) -> CanonicalPayload {
        AuditEntry::canonical_payload(self)
    }
}

/// Outcome of a chain verification pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    /// Whether every link recomputed cleanly
    pub ok: bool,
    /// 1-based position of the first bad entry (the entry sequence)
    pub first_bad_index: Option<u64>,
    /// Number of entries checked
    pub entries_checked: u64,
}

impl ChainReport {
    /// Report for a clean stream
    pub fn clean(entries_checked: u64) -> Self {
        Self {
            ok: true,
            first_bad_index: None,
            entries_checked,
        }
    }

    /// Report for a stream that broke at `index`
    pub fn broken(index: u64, entries_checked: u64) -> Self {
        Self {
            ok: false,
            first_bad_index: Some(index),
            entries_checked,
        }
    }
}

/// Verify a full stream, genesis first.
///
/// An entry fails if its stored prev-hash does not match its predecessor's
/// stored hash, or if its stored hash does not recompute from that
/// predecessor hash and its own payload. Indexes are 1-based, matching
/// entry sequences.
pub fn verify<R: ChainRecord>(records: &[R]) -> ChainReport {
    let mut prev = GENESIS_HASH.to_string();

    for (i, record) in records.iter().enumerate() {
        let index = (i + 1) as u64;

        if record.prev_hash() != prev {
            return ChainReport::broken(index, records.len() as u64);
        }

        let expected = chain_hash(&prev, &record.canonical_payload());
        if record.entry_hash() != expected {
            return ChainReport::broken(index, records.len() as u64);
        }

        prev = record.entry_hash().to_string();
    }

    ChainReport::clean(records.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::CanonicalValue;

    struct TestRecord {
        prev_hash: String,
        entry_hash: String,
        venue: String,
    }

    impl TestRecord {
        fn chained(prev: &str, venue: &str) -> Self {
            let mut record = Self {
                prev_hash: prev.to_string(),
                entry_hash: String::new(),
                venue: venue.to_string(),
            };
            record.entry_hash = chain_hash(prev, &record.canonical_payload());
            record
        }
    }

    impl ChainRecord for TestRecord {
        fn prev_hash(&self) -> &str {
            &self.prev_hash
        }

        fn entry_hash(&self) -> &str {
            &self.entry_hash
        }

        fn canonical_payload(&self) -> CanonicalPayload {
            let mut payload = CanonicalPayload::new();
            payload.set("venue", CanonicalValue::text(&self.venue));
            payload
        }
    }

    // Fixed vectors pin the byte layout; a serialization change that
    // breaks existing chains must fail here first.
    #[test]
    fn test_known_vectors() {
        assert_eq!(
            chain_hash(GENESIS_HASH, &CanonicalPayload::new()),
            "4d1a09580a4bf8f6244db4633c033db66a1204c232266feeefbd0ad2d425c52c"
        );

        let first = TestRecord::chained(GENESIS_HASH, "V1");
        assert_eq!(
            first.entry_hash,
            "5648c0a97a50aa4c6400a8df107c3ced2a35a6a314c8b487dabbd49440036eaa"
        );

        let second = TestRecord::chained(&first.entry_hash, "V2");
        assert_eq!(
            second.entry_hash,
            "a57ebedb4009e83220275b0fa5a06732aa286e23d6fbf1c6ca026692d136d59f"
        );
    }

    #[test]
    fn test_hash_is_lowercase_hex() {
        let hash = chain_hash(GENESIS_HASH, &CanonicalPayload::new());
        assert_eq!(hash.len(), 64);
        assert!(hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    fn build_chain(len: usize) -> Vec<TestRecord> {
        let mut records = Vec::with_capacity(len);
        let mut prev = GENESIS_HASH.to_string();
        for i in 0..len {
            let record = TestRecord::chained(&prev, &format!("V{}", i));
            prev = record.entry_hash.clone();
            records.push(record);
        }
        records
    }

    #[test]
    fn test_verify_clean() {
        let records = build_chain(10);
        let report = verify(&records);
        assert!(report.ok);
        assert_eq!(report.first_bad_index, None);
        assert_eq!(report.entries_checked, 10);
    }

    #[test]
    fn test_verify_empty() {
        let report = verify::<TestRecord>(&[]);
        assert!(report.ok);
        assert_eq!(report.entries_checked, 0);
    }

    #[test]
    fn test_verify_detects_mutated_hash() {
        let mut records = build_chain(10);
        records[4].entry_hash = format!("{}00", &records[4].entry_hash[..62]);

        let report = verify(&records);
        assert!(!report.ok);
        // The 5th entry is the first bad one, 1-based
        assert_eq!(report.first_bad_index, Some(5));
    }

    #[test]
    fn test_verify_detects_mutated_payload() {
        let mut records = build_chain(10);
        records[6].venue = "tampered".to_string();

        let report = verify(&records);
        assert!(!report.ok);
        assert_eq!(report.first_bad_index, Some(7));
    }

    #[test]
    fn test_verify_detects_broken_link() {
        // Entry rewritten consistently with itself still breaks the
        // chain at its successor
        let mut records = build_chain(10);
        records[3] = TestRecord::chained(GENESIS_HASH, "forged");

        let report = verify(&records);
        assert!(!report.ok);
        assert_eq!(report.first_bad_index, Some(4));
    }
}
