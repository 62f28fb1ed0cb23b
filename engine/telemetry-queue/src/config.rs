//! Configuration for the telemetry queue

use serde::{Deserialize, Serialize};

/// Batching thresholds for the usage-event buffer.
///
/// The first event after an idle period triggers a batch immediately (low
/// latency for sparse traffic); past the size threshold batches form as fast
/// as they fill; the debounce window coalesces rapid bursts in between.
/// These are tuning knobs, not load-bearing constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// List receiving buffered usage events
    pub events_key: String,

    /// TTL marker key that suppresses immediate batch triggering
    pub marker_key: String,

    /// Events per batch job
    pub batch_size: usize,

    /// Hard cap on buffered events; the oldest past this are dropped
    pub max_buffer_size: usize,

    /// Debounce window in seconds
    pub debounce_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            events_key: "api_events:buffer".to_string(),
            marker_key: "api_events:debounce".to_string(),
            batch_size: 50,
            max_buffer_size: 10_000,
            debounce_secs: 5,
        }
    }
}
