//! Error types for the consistency core

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed spec (unknown action, zero quantity, missing venue, bad unit)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Two appends to the same venue observed the same prev-hash. Retryable.
    #[error("Chain race on venue {venue}: head moved before sequence {expected_sequence} committed")]
    ChainRace {
        /// Venue whose head moved
        venue: String,
        /// Sequence the losing append tried to claim
        expected_sequence: u64,
    },

    /// Negative-stock policy forbids the operation
    #[error("Negative stock blocked for {item} at {venue}: balance {balance}, requested {requested}")]
    PolicyBlock {
        /// Venue the append targeted
        venue: String,
        /// Item the append targeted
        item: String,
        /// Balance before the append
        balance: rust_decimal::Decimal,
        /// Signed quantity the append would have applied
        requested: rust_decimal::Decimal,
    },

    /// Chain verification found a broken link
    #[error("Chain integrity failure in {stream} stream of {venue} at index {first_bad_index}")]
    ChainIntegrity {
        /// Venue whose chain is broken
        venue: String,
        /// Stream name ("ledger" or "audit")
        stream: String,
        /// First entry whose stored hash does not recompute
        first_bad_index: u64,
    },

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the caller may retry the operation with the same request id.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ChainRace { .. })
    }

    /// Short machine-readable code for structured log records.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::ChainRace { .. } => "chain_race",
            Error::PolicyBlock { .. } => "policy_block",
            Error::ChainIntegrity { .. } => "chain_integrity",
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::NotFound(_) => "not_found",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

/// Short hex fingerprint of an error message for log correlation.
///
/// The same failure produces the same fingerprint across processes, which
/// lets operators group repeated records without comparing full strings.
pub fn fingerprint(message: &str) -> String {
    let hash = blake3::hash(message.as_bytes());
    hex::encode(&hash.as_bytes()[..6])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let race = Error::ChainRace {
            venue: "V1".to_string(),
            expected_sequence: 7,
        };
        assert!(race.is_retryable());
        assert!(!Error::Validation("zero quantity".to_string()).is_retryable());
    }

    #[test]
    fn test_fingerprint_stable() {
        let a = fingerprint("handler refused: oven offline");
        let b = fingerprint("handler refused: oven offline");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert_ne!(a, fingerprint("handler refused: fridge offline"));
    }
}
