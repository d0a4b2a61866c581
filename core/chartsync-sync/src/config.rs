//! Engine configuration.

use crate::audit::AuditConfig;
use crate::error::{SyncError, SyncResult};
use crate::http::RemoteConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Records per push batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval between full passes (seconds).
    pub full_sync_interval_secs: u64,
    /// Interval between critical-table passes (seconds).
    pub critical_sync_interval_secs: u64,
    /// Records per push batch.
    pub batch_size: usize,
    /// Quiet period after an offline→online transition before the catch-up
    /// pass starts (milliseconds).
    pub online_debounce_ms: u64,
    /// Run a full pass as soon as the scheduler starts (if online).
    pub sync_on_start: bool,
    /// Audit interceptor settings.
    pub audit: AuditConfig,
    /// HTTP remote settings; `None` when the host supplies its own transport.
    pub remote: Option<RemoteConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            full_sync_interval_secs: 300,
            critical_sync_interval_secs: 60,
            batch_size: DEFAULT_BATCH_SIZE,
            online_debounce_ms: 2_000,
            sync_on_start: true,
            audit: AuditConfig::default(),
            remote: None,
        }
    }
}

impl SyncConfig {
    /// Parses a JSON document; missing keys take their defaults.
    pub fn from_json_str(json: &str) -> SyncResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the scheduler cannot work with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.batch_size == 0 {
            return Err(SyncError::Config("batch_size must be at least 1".into()));
        }
        if self.full_sync_interval_secs == 0 || self.critical_sync_interval_secs == 0 {
            return Err(SyncError::Config("sync intervals must be non-zero".into()));
        }
        if self.critical_sync_interval_secs > self.full_sync_interval_secs {
            return Err(SyncError::Config(
                "critical_sync_interval_secs must not exceed full_sync_interval_secs".into(),
            ));
        }
        if self.audit.queue_capacity == 0 {
            return Err(SyncError::Config("audit.queue_capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn full_sync_interval(&self) -> Duration {
        Duration::from_secs(self.full_sync_interval_secs)
    }

    pub fn critical_sync_interval(&self) -> Duration {
        Duration::from_secs(self.critical_sync_interval_secs)
    }

    pub fn online_debounce(&self) -> Duration {
        Duration::from_millis(self.online_debounce_ms)
    }
}
