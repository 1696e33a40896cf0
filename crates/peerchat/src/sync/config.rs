//! Sync loop settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sync loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Run the sync loop at all.
    pub enabled: bool,
    /// Seconds between cycles (default: 5).
    pub tick_interval_secs: u64,
    /// Local history length at or above which no sync is attempted (default: 10).
    pub download_threshold: usize,
    /// Minimum seconds between two contacts with the same peer (default: 360).
    pub contact_refill_secs: u64,
    /// Per-fetch timeout in seconds (default: 10).
    pub fetch_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_secs: 5,
            download_threshold: 10,
            contact_refill_secs: 360,
            fetch_timeout_secs: 10,
        }
    }
}

impl SyncConfig {
    /// Never zero; `tokio::time::interval` panics on a zero period.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn contact_refill(&self) -> Duration {
        Duration::from_secs(self.contact_refill_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
