//! Venue core service
//!
//! Binds the stock ledger, audit log, outbox consumer, projections and
//! recovery tooling into a single embeddable handle. Restaurant-facing
//! services hold a [`Core`] and call its typed surfaces; `stockctl`
//! runs the recovery tooling against the same store from the command
//! line, without starting a consumer.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod core;
pub mod error;

pub use crate::core::Core;
pub use error::{Error, Result};
