//! Sync timing configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing knobs for the scheduler and the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period after the last local write before a pass runs.
    pub debounce_ms: u64,
    /// How often the interval trigger checks the time since the last sync.
    pub tick_interval_ms: u64,
    /// Staleness that triggers a sync while the app is in the foreground.
    pub foreground_threshold_ms: u64,
    /// Staleness that triggers a sync while the app is in the background.
    pub background_threshold_ms: u64,
    /// Upper bound for every remote call.
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            tick_interval_ms: 5_000,
            foreground_threshold_ms: 15_000,
            background_threshold_ms: 10 * 60 * 1000,
            request_timeout_ms: 30_000,
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Staleness threshold for the given app state.
    pub fn staleness_threshold(&self, foreground: bool) -> Duration {
        if foreground {
            Duration::from_millis(self.foreground_threshold_ms)
        } else {
            Duration::from_millis(self.background_threshold_ms)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
