//! Read-model projections over the outbox stream
//!
//! Each handler in this crate folds one event topic into a read model
//! keyed under `(venue, model, record)`. Handlers are idempotent per
//! event id, so redelivery and rebuild replay the same code path.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod expiry;
pub mod kds_stats;
pub mod negative;
pub mod on_hand;

pub use expiry::ExpiryHandler;
pub use kds_stats::KdsStatsHandler;
pub use negative::NegativeDiagnosisHandler;
pub use on_hand::OnHandHandler;

use std::sync::Arc;

use outbox::HandlerRegistry;
use stock_core::config::ProjectionConfig;
use stock_core::{Storage, Topic};

/// Wire the canonical projection set into a registry.
///
/// Movement events feed the on-hand balance first and the expiry index
/// second; detection events feed the diagnosis record. Topics without
/// a read model (`stock.negative-warning`, `audit.recorded`) are left
/// unregistered and the consumer retires them on sight.
pub fn default_registry(storage: Arc<Storage>, config: &ProjectionConfig) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(
        Topic::StockMovement,
        Arc::new(OnHandHandler::new(
            storage.clone(),
            config.diagnosis_window,
        )),
    );
    registry.register(
        Topic::StockMovement,
        Arc::new(ExpiryHandler::new(storage.clone(), config.expiring_soon_days)),
    );
    registry.register(
        Topic::KdsTicketClosed,
        Arc::new(KdsStatsHandler::new(storage.clone())),
    );
    registry.register(
        Topic::StockNegativeDetected,
        Arc::new(NegativeDiagnosisHandler::new(storage)),
    );
    registry
}
