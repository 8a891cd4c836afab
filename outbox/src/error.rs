//! Error types for event dispatch

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Outbox error
#[derive(Debug, Error)]
pub enum Error {
    /// A handler reported a failure for an event
    #[error("handler {handler} failed: {message}")]
    Handler {
        /// Name of the failing handler
        handler: String,
        /// Failure text, recorded on the event as last-error
        message: String,
    },

    /// A handler ran past its deadline
    #[error("handler {handler} timed out after {after:?}")]
    Timeout {
        /// Name of the handler that overran
        handler: String,
        /// Deadline that was enforced
        after: Duration,
    },

    /// An event exhausted its retry budget and moved to the dead-letter
    /// store
    #[error("event {event_id} poisoned after {attempts} attempts")]
    Poison {
        /// Id of the poisoned event
        event_id: Uuid,
        /// Claims recorded when the move happened
        attempts: u32,
    },

    /// Envelope carries a schema version no decoder understands
    #[error("unknown schema {topic} v{version}")]
    UnknownSchema {
        /// Dotted topic name from the envelope
        topic: String,
        /// Schema version from the envelope
        version: u16,
    },

    /// Storage or validation failure from the core
    #[error(transparent)]
    Core(#[from] stock_core::Error),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
