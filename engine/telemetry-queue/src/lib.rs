//! # Telemetry Queue
//!
//! Buffering and background insertion for API-usage telemetry. Usage events
//! are cheap and extremely bursty, so the write path is a queue-store list
//! with a size/first-item trigger and a short debounce window, handing full
//! batches to a background worker that bulk-inserts into the relational
//! store.
//!
//! ## Architecture
//!
//! - **ApiUsageEvent**: one recorded API call, leniently parsed
//! - **UsageEventBuffer**: list-backed buffer with batch triggering
//! - **JobQueue** / worker: consumes batch jobs and performs the inserts
//! - **UsageEventSink**: abstract insert target; **PostgresUsageSink** is
//!   the production implementation

pub mod buffer;
pub mod config;
pub mod error;
pub mod event;
pub mod queue;
pub mod worker;

pub use buffer::UsageEventBuffer;
pub use config::BatchConfig;
pub use error::{QueueError, Result};
pub use event::ApiUsageEvent;
pub use queue::{BatchJob, JobQueue, JobSubmitter, WorkerMetricsSnapshot};
pub use worker::{MemoryUsageSink, PostgresUsageSink, UsageEventRow, UsageEventSink};
