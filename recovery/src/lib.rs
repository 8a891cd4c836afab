//! Recovery and integrity tooling
//!
//! Everything here is deliberately boring: rebuilds replay the same
//! handlers the live consumer runs, DLQ replay reuses the normal
//! pending path, and verification only reads. The event streams stay
//! the single source of truth.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod error;
pub mod health;
pub mod rebuild;
pub mod replay;
pub mod verify;

pub use error::{Error, Result};
pub use health::{ConsumerHealth, HealthLevel, HealthMonitor, HealthSnapshot, VenueChainHealth};
pub use rebuild::{ModelKey, RebuildStats, Rebuilder};
pub use replay::{replay_dlq, DlqFilter, ReplayStats};
pub use verify::{verify_chain, FINDING_CHAIN_BROKEN};
