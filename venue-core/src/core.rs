//! The core handle
//!
//! `Core::open` wires storage, ledger, audit log, emitter, the handler
//! registry and the consumer task into one owner. Dropping the handle
//! without calling [`Core::shutdown`] detaches the consumer; callers
//! that want the final STOPPED heartbeat shut down explicitly.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use outbox::{Emitter, HandlerRegistry, OutboxConsumer};
use recovery::{
    replay_dlq, verify_chain, DlqFilter, HealthMonitor, HealthSnapshot, ModelKey, RebuildStats,
    Rebuilder, ReplayStats,
};
use stock_core::config::ProjectionConfig;
use stock_core::types::{ChainStream, IntegrityFinding, VenueId};
use stock_core::{
    AuditLog, ChainReport, CoreConfig, EventPayload, Metrics, StockLedger, Storage,
};

use crate::error::Result;

/// Owner of the consistency core's components and the consumer task
pub struct Core {
    config: CoreConfig,
    storage: Arc<Storage>,
    metrics: Metrics,
    ledger: StockLedger,
    audit: AuditLog,
    emitter: Emitter,
    rebuilder: Rebuilder,
    health: HealthMonitor,
    shutdown: watch::Sender<bool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl Core {
    /// Open storage, wire the projection registry and start the consumer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(config: CoreConfig) -> Result<Core> {
        Self::open_with(config, projections::default_registry)
    }

    /// Open with a caller-built handler registry.
    ///
    /// The builder receives the shared storage and projection settings;
    /// services that subscribe their own handlers start from
    /// `projections::default_registry` and append to it.
    pub fn open_with<F>(config: CoreConfig, build_registry: F) -> Result<Core>
    where
        F: FnOnce(Arc<Storage>, &ProjectionConfig) -> HandlerRegistry,
    {
        config.validate()?;

        let metrics = Metrics::new()?;
        let storage = Arc::new(Storage::open(&config)?);
        info!(
            service = %config.service_name,
            data_dir = %config.data_dir.display(),
            "storage opened"
        );

        let ledger = StockLedger::new(storage.clone(), &config.ledger, metrics.clone());
        let audit = AuditLog::new(storage.clone(), metrics.clone());
        let emitter = Emitter::new(storage.clone());
        let rebuilder = Rebuilder::new(storage.clone(), &config.projections, &config.rebuild);
        let health = HealthMonitor::new(storage.clone(), &config.health);

        let registry: Arc<HandlerRegistry> =
            Arc::new(build_registry(storage.clone(), &config.projections));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let consumer = Arc::new(OutboxConsumer::new(
            storage.clone(),
            registry,
            &config.outbox,
        ));
        let handle = tokio::spawn(consumer.run(shutdown_rx));

        Ok(Core {
            config,
            storage,
            metrics,
            ledger,
            audit,
            emitter,
            rebuilder,
            health,
            shutdown,
            consumer: Mutex::new(Some(handle)),
        })
    }

    /// The stock ledger
    pub fn ledger(&self) -> &StockLedger {
        &self.ledger
    }

    /// The audit log
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Stage a domain event for dispatch
    pub fn emit(&self, payload: &EventPayload) -> Result<Uuid> {
        Ok(self.emitter.emit(payload)?)
    }

    /// The event emitter, for callers that choose partition keys
    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    /// Shared storage, for read paths that bypass the typed surfaces
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Effective configuration
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Rebuild read models for one venue
    pub async fn rebuild(
        &self,
        venue: &VenueId,
        model_keys: &[ModelKey],
        truncate: bool,
    ) -> Result<RebuildStats> {
        Ok(self.rebuilder.rebuild(venue, model_keys, truncate).await?)
    }

    /// Replay matching dead letters for one venue
    pub fn replay_dlq(&self, venue: &VenueId, filter: &DlqFilter) -> Result<ReplayStats> {
        Ok(replay_dlq(&self.storage, venue, filter)?)
    }

    /// Verify one hash chain and persist the outcome
    pub fn verify_chain(&self, venue: &VenueId, stream: ChainStream) -> Result<ChainReport> {
        Ok(verify_chain(&self.storage, venue, stream)?)
    }

    /// Point-in-time health snapshot
    pub fn health(&self) -> Result<HealthSnapshot> {
        Ok(self.health.snapshot()?)
    }

    /// Integrity findings newest-first
    pub fn recent_findings(&self, limit: usize) -> Result<Vec<IntegrityFinding>> {
        Ok(self.health.recent_findings(limit)?)
    }

    /// Registry backing the ledger and audit metrics.
    ///
    /// Outbox counters register in the prometheus default registry; an
    /// exporter gathers both.
    pub fn metrics(&self) -> &prometheus::Registry {
        self.metrics.registry()
    }

    /// Stop the consumer: signal, wait out the grace window, then abort.
    ///
    /// The consumer writes its STOPPED heartbeat on the way out.
    /// Idempotent; later calls return immediately.
    pub async fn shutdown(&self) {
        let mut handle = match self.consumer.lock().await.take() {
            Some(handle) => handle,
            None => return,
        };

        let _ = self.shutdown.send(true);
        let grace = self.config.outbox.shutdown_grace();
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => info!("consumer stopped"),
            Ok(Err(error)) => warn!(%error, "consumer task failed"),
            Err(_) => {
                warn!(
                    grace_s = self.config.outbox.shutdown_grace_s,
                    "consumer did not stop within grace, aborting"
                );
                handle.abort();
            }
        }
    }
}
