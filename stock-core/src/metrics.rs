//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `stock_ledger_appends_total` - Ledger entries committed
//! - `stock_ledger_duplicates_total` - Appends answered from an idempotency index
//! - `stock_ledger_rejections_total` - Appends refused (validation or policy)
//! - `stock_ledger_chain_races_total` - Appends that lost the head race
//! - `stock_ledger_negative_balances_total` - Appends that left a balance negative
//! - `stock_ledger_append_duration_seconds` - Histogram of append latencies
//! - `stock_audit_appends_total` - Audit entries committed
//! - `stock_events_emitted_total` - Outbox events written by producers
//! - `stock_chain_verifications_total` - Chain verification runs

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Ledger entries committed
    pub appends_total: IntCounter,

    /// Appends answered from an idempotency index
    pub duplicates_total: IntCounter,

    /// Appends refused by validation or policy
    pub rejections_total: IntCounter,

    /// Appends that observed a moved head
    pub chain_races_total: IntCounter,

    /// Appends that left a balance negative
    pub negative_balances_total: IntCounter,

    /// Append latency histogram
    pub append_duration: Histogram,

    /// Audit entries committed
    pub audit_appends_total: IntCounter,

    /// Outbox events written by producers
    pub events_emitted_total: IntCounter,

    /// Chain verification runs
    pub chain_verifications_total: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let appends_total = IntCounter::new(
            "stock_ledger_appends_total",
            "Ledger entries committed",
        )?;
        registry.register(Box::new(appends_total.clone()))?;

        let duplicates_total = IntCounter::new(
            "stock_ledger_duplicates_total",
            "Appends answered from an idempotency index",
        )?;
        registry.register(Box::new(duplicates_total.clone()))?;

        let rejections_total = IntCounter::new(
            "stock_ledger_rejections_total",
            "Appends refused by validation or policy",
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let chain_races_total = IntCounter::new(
            "stock_ledger_chain_races_total",
            "Appends that observed a moved head",
        )?;
        registry.register(Box::new(chain_races_total.clone()))?;

        let negative_balances_total = IntCounter::new(
            "stock_ledger_negative_balances_total",
            "Appends that left a balance negative",
        )?;
        registry.register(Box::new(negative_balances_total.clone()))?;

        let append_duration = Histogram::with_opts(
            HistogramOpts::new(
                "stock_ledger_append_duration_seconds",
                "Histogram of append latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(append_duration.clone()))?;

        let audit_appends_total = IntCounter::new(
            "stock_audit_appends_total",
            "Audit entries committed",
        )?;
        registry.register(Box::new(audit_appends_total.clone()))?;

        let events_emitted_total = IntCounter::new(
            "stock_events_emitted_total",
            "Outbox events written by producers",
        )?;
        registry.register(Box::new(events_emitted_total.clone()))?;

        let chain_verifications_total = IntCounter::new(
            "stock_chain_verifications_total",
            "Chain verification runs",
        )?;
        registry.register(Box::new(chain_verifications_total.clone()))?;

        Ok(Self {
            appends_total,
            duplicates_total,
            rejections_total,
            chain_races_total,
            negative_balances_total,
            append_duration,
            audit_appends_total,
            events_emitted_total,
            chain_verifications_total,
            registry,
        })
    }

    /// Record a committed ledger append
    pub fn record_append(&self, duration_seconds: f64, emitted_events: usize) {
        self.appends_total.inc();
        self.append_duration.observe(duration_seconds);
        self.events_emitted_total.inc_by(emitted_events as u64);
    }

    /// Record an append answered from an idempotency index
    pub fn record_duplicate(&self) {
        self.duplicates_total.inc();
    }

    /// Record a refused append
    pub fn record_rejection(&self) {
        self.rejections_total.inc();
    }

    /// Record a lost head race
    pub fn record_chain_race(&self) {
        self.chain_races_total.inc();
    }

    /// Record an append that left the balance negative
    pub fn record_negative_balance(&self) {
        self.negative_balances_total.inc();
    }

    /// Record a committed audit append
    pub fn record_audit_append(&self, emitted_events: usize) {
        self.audit_appends_total.inc();
        self.events_emitted_total.inc_by(emitted_events as u64);
    }

    /// Record a chain verification run
    pub fn record_verification(&self) {
        self.chain_verifications_total.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.appends_total.get(), 0);
        assert_eq!(metrics.audit_appends_total.get(), 0);
    }

    #[test]
    fn test_record_append() {
        let metrics = Metrics::new().unwrap();
        metrics.record_append(0.002, 2);
        metrics.record_append(0.004, 1);

        assert_eq!(metrics.appends_total.get(), 2);
        assert_eq!(metrics.events_emitted_total.get(), 3);
    }

    #[test]
    fn test_record_outcomes() {
        let metrics = Metrics::new().unwrap();
        metrics.record_duplicate();
        metrics.record_rejection();
        metrics.record_chain_race();
        metrics.record_negative_balance();

        assert_eq!(metrics.duplicates_total.get(), 1);
        assert_eq!(metrics.rejections_total.get(), 1);
        assert_eq!(metrics.chain_races_total.get(), 1);
        assert_eq!(metrics.negative_balances_total.get(), 1);
    }

    #[test]
    fn test_instances_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_duplicate();

        assert_eq!(a.duplicates_total.get(), 1);
        assert_eq!(b.duplicates_total.get(), 0);
    }
}
