//! Pool settings that can be loaded from a configuration file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The plain (non-callback) half of [`PoolOptions`](super::PoolOptions).
///
/// Every field is optional when deserializing; missing ones take the
/// `PoolOptions::new()` defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_idle: u32,
    pub max_active: u32,
    pub max_concurrent_streams: u32,
    pub wait: bool,
    pub reuse: bool,
    /// Maximum age in milliseconds of an idle slot connection
    pub idle_timeout_ms: Option<u64>,
    /// Background reaper period in milliseconds
    pub reap_interval_ms: Option<u64>,
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn reap_interval(&self) -> Option<Duration> {
        self.reap_interval_ms.map(Duration::from_millis)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: 8,
            max_active: 64,
            max_concurrent_streams: 64,
            wait: true,
            reuse: false,
            idle_timeout_ms: None,
            reap_interval_ms: None,
        }
    }
}
