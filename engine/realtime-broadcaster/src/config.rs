//! Configuration for the realtime broadcaster

use serde::{Deserialize, Serialize};

/// Tunables for the realtime broadcaster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    /// Interval between batched broadcasts in milliseconds
    pub flush_interval_ms: u64,

    /// Most recent items retained per kind per app; older ones are dropped
    pub max_buffer_size: usize,

    /// Online-users cache entry lifetime in milliseconds. Longer than the
    /// refresh interval so one missed refresh does not blank the view.
    pub online_cache_ttl_ms: u64,

    /// Interval between online-users refreshes in milliseconds
    pub online_refresh_ms: u64,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 3000,
            max_buffer_size: 1000,
            online_cache_ttl_ms: 60_000,
            online_refresh_ms: 30_000,
        }
    }
}
