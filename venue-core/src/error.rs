//! Service-level error type

use thiserror::Error;

/// Errors surfaced by the core handle
#[derive(Debug, Error)]
pub enum Error {
    /// Ledger, audit or storage failure
    #[error(transparent)]
    Core(#[from] stock_core::Error),

    /// Outbox failure
    #[error(transparent)]
    Outbox(#[from] outbox::Error),

    /// Rebuild, replay or verification failure
    #[error(transparent)]
    Recovery(#[from] recovery::Error),

    /// Metrics registry failure
    #[error("metrics registry: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Crate result alias
pub type Result<T> = std::result::Result<T, Error>;
