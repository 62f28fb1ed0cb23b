//! Configuration for the event buffer and analytical sink

use serde::{Deserialize, Serialize};

/// Tunables for the event buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBufferConfig {
    /// List receiving new pushes
    pub buffer_key: String,

    /// Drain target during an in-progress flush
    pub flushing_key: String,

    /// Dead-letter list for records that failed even in isolation
    pub dead_letter_key: String,

    /// Target table in the analytical store
    pub table: String,

    /// Interval between timer-driven flushes in milliseconds
    pub flush_interval_ms: u64,

    /// Records per bulk INSERT
    pub batch_size: usize,

    /// Flush attempts during graceful shutdown
    pub close_retries: u32,
}

impl Default for EventBufferConfig {
    fn default() -> Self {
        Self {
            buffer_key: "events:buffer".to_string(),
            flushing_key: "events:flushing".to_string(),
            dead_letter_key: "events:dlq".to_string(),
            table: "events".to_string(),
            flush_interval_ms: 3000,
            batch_size: 300,
            close_retries: 3,
        }
    }
}

/// Tunables for the analytical sink HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Base URL of the exec endpoint, e.g. `http://questdb:9000`
    pub base_url: String,

    /// Per-request deadline in milliseconds
    pub timeout_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self { base_url: "http://questdb:9000".to_string(), timeout_ms: 30_000 }
    }
}
