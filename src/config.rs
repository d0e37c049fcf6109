use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TelemetryError};

pub const DEFAULT_FRAME_WINDOW_MS: u64 = 1000;
pub const DEFAULT_REFRESH_RATE_HZ: u32 = 60;
pub const DEFAULT_HEAP_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_HISTORY_CAPACITY: usize = 5;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Tunables for the four collectors and the hosts that drive them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Length of one frame-rate measurement window.
    pub frame_window_ms: u64,
    /// Paint cadence of the native frame driver.
    pub refresh_rate_hz: u32,
    pub heap_interval_ms: u64,
    /// Number of network records kept in the rolling history.
    pub history_capacity: usize,
    /// Timeout applied by the reqwest-backed fetch capability.
    pub request_timeout_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            frame_window_ms: DEFAULT_FRAME_WINDOW_MS,
            refresh_rate_hz: DEFAULT_REFRESH_RATE_HZ,
            heap_interval_ms: DEFAULT_HEAP_INTERVAL_MS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl TelemetryConfig {
    /// Parse a JSON document. Missing fields keep their defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_window_ms == 0 {
            return Err(TelemetryError::InvalidConfig("frame_window_ms must be > 0".into()));
        }
        if self.refresh_rate_hz == 0 {
            return Err(TelemetryError::InvalidConfig("refresh_rate_hz must be > 0".into()));
        }
        if self.heap_interval_ms == 0 {
            return Err(TelemetryError::InvalidConfig("heap_interval_ms must be > 0".into()));
        }
        if self.history_capacity == 0 {
            return Err(TelemetryError::InvalidConfig("history_capacity must be > 0".into()));
        }
        Ok(())
    }

    pub fn heap_interval(&self) -> Duration {
        Duration::from_millis(self.heap_interval_ms)
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refresh_rate_hz as f64)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
