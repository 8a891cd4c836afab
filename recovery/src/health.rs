//! Health snapshot over the consistency core
//!
//! The snapshot reads persisted state only: pending count, DLQ count,
//! the consumer heartbeat, the last chain verification per stream and
//! the finding log. It never triggers verification or repairs.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;

use outbox::CONSUMER_JOB_KEY;
use stock_core::config::HealthConfig;
use stock_core::types::{
    ChainStatus, ChainStream, HeartbeatStatus, IntegrityFinding, JobHeartbeat, Severity, VenueId,
};
use stock_core::Storage;

use crate::error::Result;

/// Aggregated health level, worst component wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum HealthLevel {
    /// Everything within thresholds
    Ok,
    /// Degraded but operating
    Warn,
    /// Operator attention required
    Crit,
}

impl HealthLevel {
    /// Uppercase label for logs and the CLI
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthLevel::Ok => "OK",
            HealthLevel::Warn => "WARN",
            HealthLevel::Crit => "CRIT",
        }
    }
}

/// Consumer liveness as seen from its heartbeat record
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerHealth {
    /// Last written heartbeat, if the consumer ever ran
    pub heartbeat: Option<JobHeartbeat>,
    /// Heartbeat older than the staleness threshold, or missing
    pub stale: bool,
}

/// Last verification outcome for both streams of one venue
#[derive(Debug, Clone, Serialize)]
pub struct VenueChainHealth {
    /// Venue the statuses belong to
    pub venue: VenueId,
    /// Ledger stream status; `None` until first verified
    pub ledger: Option<ChainStatus>,
    /// Audit stream status; `None` until first verified
    pub audit: Option<ChainStatus>,
}

/// Point-in-time view of the core's operational state
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
    /// Aggregated level
    pub level: HealthLevel,
    /// Events awaiting a terminal outcome
    pub outbox_lag: u64,
    /// Lag measured against the warn/crit thresholds
    pub outbox_level: HealthLevel,
    /// Dead letters awaiting replay
    pub dlq_size: u64,
    /// Consumer heartbeat and staleness
    pub consumer: ConsumerHealth,
    /// Chain verification state per venue
    pub chains: Vec<VenueChainHealth>,
    /// Most recent CRITICAL findings, newest first
    pub critical_findings: Vec<IntegrityFinding>,
}

/// Reads health state out of the shared store
pub struct HealthMonitor {
    storage: Arc<Storage>,
    config: HealthConfig,
}

impl HealthMonitor {
    /// Create a monitor over the shared store
    pub fn new(storage: Arc<Storage>, config: &HealthConfig) -> Self {
        Self {
            storage,
            config: config.clone(),
        }
    }

    /// Take a snapshot.
    ///
    /// A stale or missing heartbeat degrades to WARN; lag thresholds
    /// degrade to WARN or CRIT; any persisted broken-chain status
    /// degrades to CRIT.
    pub fn snapshot(&self) -> Result<HealthSnapshot> {
        let now = Utc::now();

        let outbox_lag = self.storage.pending_count()?;
        let outbox_level = if outbox_lag >= self.config.outbox_lag_crit {
            HealthLevel::Crit
        } else if outbox_lag >= self.config.outbox_lag_warn {
            HealthLevel::Warn
        } else {
            HealthLevel::Ok
        };

        let heartbeat = self.storage.heartbeat(CONSUMER_JOB_KEY)?;
        let stale = match &heartbeat {
            Some(beat) => {
                now - beat.last_heartbeat_at
                    > Duration::seconds(self.config.consumer_stale_s as i64)
            }
            None => true,
        };
        if stale {
            warn!(
                job_key = CONSUMER_JOB_KEY,
                stale_after_s = self.config.consumer_stale_s,
                "consumer heartbeat stale or missing"
            );
        }

        let chains = self.chain_health()?;
        let chain_broken = chains.iter().any(|venue| {
            [&venue.ledger, &venue.audit]
                .into_iter()
                .flatten()
                .any(|status| !status.ok)
        });

        let critical_findings: Vec<IntegrityFinding> = self
            .storage
            .recent_findings(50)?
            .into_iter()
            .filter(|finding| finding.severity == Severity::Critical)
            .collect();

        let mut level = outbox_level;
        if stale {
            level = level.max(HealthLevel::Warn);
        }
        if chain_broken {
            level = HealthLevel::Crit;
        }

        Ok(HealthSnapshot {
            taken_at: now,
            level,
            outbox_lag,
            outbox_level,
            dlq_size: self.storage.dlq_count()?,
            consumer: ConsumerHealth { heartbeat, stale },
            chains,
            critical_findings,
        })
    }

    /// Integrity findings newest-first
    pub fn recent_findings(&self, limit: usize) -> Result<Vec<IntegrityFinding>> {
        Ok(self.storage.recent_findings(limit)?)
    }

    /// Chain statuses grouped per venue.
    ///
    /// Venues with ledger entries but no verification run yet appear
    /// with both streams unset.
    fn chain_health(&self) -> Result<Vec<VenueChainHealth>> {
        let mut venues: Vec<VenueId> = self.storage.ledger_venues()?;
        let statuses = self.storage.chain_statuses()?;
        for (venue, _, _) in &statuses {
            if !venues.contains(venue) {
                venues.push(venue.clone());
            }
        }
        venues.sort();

        Ok(venues
            .into_iter()
            .map(|venue| {
                let find = |stream: ChainStream| {
                    statuses
                        .iter()
                        .find(|(v, s, _)| *v == venue && *s == stream)
                        .map(|(_, _, status)| status.clone())
                };
                VenueChainHealth {
                    ledger: find(ChainStream::Ledger),
                    audit: find(ChainStream::Audit),
                    venue,
                }
            })
            .collect())
    }
}
