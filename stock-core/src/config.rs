//! Configuration for the consistency core

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::{NegativeStockPolicy, VenueId};

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Store tuning
    pub store: StoreConfig,

    /// Outbox consumer settings
    pub outbox: OutboxConfig,

    /// Ledger policy settings
    pub ledger: LedgerConfig,

    /// Projection settings
    pub projections: ProjectionConfig,

    /// Health thresholds
    pub health: HealthConfig,

    /// Rebuild settings
    pub rebuild: RebuildConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/brigade"),
            service_name: "brigade-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            store: StoreConfig::default(),
            outbox: OutboxConfig::default(),
            ledger: LedgerConfig::default(),
            projections: ProjectionConfig::default(),
            health: HealthConfig::default(),
            rebuild: RebuildConfig::default(),
        }
    }
}

/// RocksDB tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Create the database if the directory is empty
    pub create_if_missing: bool,

    /// Max open SST files
    pub max_open_files: i32,

    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            max_open_files: 512,
            write_buffer_size_mb: 64,
            max_background_jobs: 2,
        }
    }
}

/// Outbox consumer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Consumer tick interval (ms)
    pub poll_interval_ms: u64,

    /// Max events claimed per tick
    pub batch_size: usize,

    /// How long a claim hides an event from other claims (s)
    pub visibility_timeout_s: u64,

    /// Claims before an event moves to the DLQ
    pub max_attempts: u32,

    /// First retry delay (s)
    pub backoff_base_s: u64,

    /// Retry delay ceiling (s)
    pub backoff_cap_s: u64,

    /// Random spread applied to each delay (fraction of the delay)
    pub jitter_fraction: f64,

    /// Deadline per handler invocation (s)
    pub handler_timeout_s: u64,

    /// How long shutdown waits for the in-flight batch (s)
    pub shutdown_grace_s: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            batch_size: 100,
            visibility_timeout_s: 60,
            max_attempts: 8,
            backoff_base_s: 5,
            backoff_cap_s: 600,
            jitter_fraction: 0.2,
            handler_timeout_s: 10,
            shutdown_grace_s: 15,
        }
    }
}

impl OutboxConfig {
    /// Tick interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Visibility timeout as a chrono Duration
    pub fn visibility_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.visibility_timeout_s as i64)
    }

    /// Handler deadline as a Duration
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_s)
    }

    /// Shutdown grace window as a Duration
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_s)
    }
}

/// Ledger policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Policy applied when a venue has no override
    pub negative_stock_policy: NegativeStockPolicy,

    /// Per-venue policy overrides
    pub venue_policies: BTreeMap<String, NegativeStockPolicy>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            negative_stock_policy: NegativeStockPolicy::Warn,
            venue_policies: BTreeMap::new(),
        }
    }
}

impl LedgerConfig {
    /// Effective policy for a venue
    pub fn policy_for(&self, venue: &VenueId) -> NegativeStockPolicy {
        self.venue_policies
            .get(venue.as_str())
            .copied()
            .unwrap_or(self.negative_stock_policy)
    }
}

/// Projection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Window for the expiring-soon index (days)
    pub expiring_soon_days: u32,

    /// Movements included in a negative-stock diagnosis
    pub diagnosis_window: usize,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            expiring_soon_days: 7,
            diagnosis_window: 10,
        }
    }
}

/// Health thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Heartbeat age after which the consumer counts as stalled (s)
    pub consumer_stale_s: u64,

    /// Pending-event count that degrades health to WARN
    pub outbox_lag_warn: u64,

    /// Pending-event count that degrades health to CRIT
    pub outbox_lag_crit: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            consumer_stale_s: 120,
            outbox_lag_warn: 25,
            outbox_lag_crit: 100,
        }
    }
}

/// Rebuild settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RebuildConfig {
    /// Entries or events re-dispatched per storage scan batch
    pub batch_size: usize,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self { batch_size: 500 }
    }
}

impl CoreConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CoreConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults with environment overrides
    pub fn from_env() -> crate::Result<Self> {
        let mut config = CoreConfig::default();

        if let Ok(data_dir) = std::env::var("BRIGADE_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(value) = std::env::var("BRIGADE_OUTBOX_POLL_INTERVAL_MS") {
            config.outbox.poll_interval_ms = parse_env("BRIGADE_OUTBOX_POLL_INTERVAL_MS", &value)?;
        }

        if let Ok(value) = std::env::var("BRIGADE_OUTBOX_BATCH_SIZE") {
            config.outbox.batch_size = parse_env("BRIGADE_OUTBOX_BATCH_SIZE", &value)?;
        }

        if let Ok(value) = std::env::var("BRIGADE_OUTBOX_MAX_ATTEMPTS") {
            config.outbox.max_attempts = parse_env("BRIGADE_OUTBOX_MAX_ATTEMPTS", &value)?;
        }

        if let Ok(value) = std::env::var("BRIGADE_NEGATIVE_STOCK_POLICY") {
            config.ledger.negative_stock_policy =
                NegativeStockPolicy::parse(&value).ok_or_else(|| {
                    crate::Error::Config(format!("unknown negative stock policy: {}", value))
                })?;
        }

        if let Ok(value) = std::env::var("BRIGADE_CONSUMER_STALE_S") {
            config.health.consumer_stale_s = parse_env("BRIGADE_CONSUMER_STALE_S", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would wedge the consumer
    pub fn validate(&self) -> crate::Result<()> {
        if self.outbox.batch_size == 0 {
            return Err(crate::Error::Config(
                "outbox.batch_size must be positive".to_string(),
            ));
        }
        if self.outbox.max_attempts == 0 {
            return Err(crate::Error::Config(
                "outbox.max_attempts must be positive".to_string(),
            ));
        }
        if self.outbox.poll_interval_ms == 0 {
            return Err(crate::Error::Config(
                "outbox.poll_interval_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.outbox.jitter_fraction) {
            return Err(crate::Error::Config(
                "outbox.jitter_fraction must be within [0, 1]".to_string(),
            ));
        }
        if self.outbox.backoff_cap_s < self.outbox.backoff_base_s {
            return Err(crate::Error::Config(
                "outbox.backoff_cap_s must be at least backoff_base_s".to_string(),
            ));
        }
        if self.rebuild.batch_size == 0 {
            return Err(crate::Error::Config(
                "rebuild.batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> crate::Result<T> {
    value
        .parse()
        .map_err(|_| crate::Error::Config(format!("invalid value for {}: {}", name, value)))
}
