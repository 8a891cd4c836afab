//! Transactional outbox: durable events, polling consumer, dead letters
//!
//! Producers stage events in the same store as the state they describe;
//! the [`OutboxConsumer`] drains them to in-process handlers with
//! at-least-once delivery, per-partition-key ordering, exponential
//! backoff, and a dead-letter store for events that exhaust their retry
//! budget.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod backoff;
pub mod consumer;
pub mod emitter;
pub mod error;
pub mod metrics;
pub mod registry;

pub use consumer::{OutboxConsumer, CONSUMER_JOB_KEY};
pub use emitter::Emitter;
pub use error::{Error, Result};
pub use registry::{EventHandler, HandlerRegistry};
