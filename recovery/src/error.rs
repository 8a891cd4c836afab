//! Recovery error type

use thiserror::Error;

/// Errors raised by rebuild, replay and verification routines
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying ledger or storage failure
    #[error(transparent)]
    Core(#[from] stock_core::Error),

    /// Handler failure surfaced by a rebuild dispatch
    #[error(transparent)]
    Outbox(#[from] outbox::Error),

    /// Caller named a read model that does not exist
    #[error("unknown model key: {0}")]
    UnknownModelKey(String),
}

/// Crate result alias
pub type Result<T> = std::result::Result<T, Error>;
