//! # Event Buffer
//!
//! This crate absorbs the high-volume event write path of the Pulse analytics
//! platform. Incoming SDK events are validated, pushed onto a list in the
//! queue store, and periodically drained into the analytical column store as
//! bulk INSERT statements. A failed batch degrades to per-record inserts, and
//! records that fail even in isolation land on a dead-letter list for manual
//! inspection.
//!
//! ## Architecture
//!
//! - **AnalyticsEvent**: the validated record accepted from the route layer
//! - **EventBuffer**: push/flush lifecycle with a single-flight flush guard
//! - **AnalyticsSink**: abstract bulk INSERT target; **QuestDbSink** ships
//!   statements over the HTTP exec endpoint
//!
//! The buffer's source of truth is the shared queue store, not process
//! memory: concurrent pushes from many request handlers coordinate through
//! the store's atomic primitives, and an atomic rename hands the accumulated
//! list to exactly one flusher even across processes.

pub mod buffer;
pub mod config;
pub mod error;
pub mod record;
pub mod sink;

pub use buffer::{DeadLetterEntry, EventBuffer, PushFailure, PushOutcome};
pub use config::{EventBufferConfig, SinkConfig};
pub use error::{BufferError, Result};
pub use record::{AnalyticsEvent, ParamValue};
pub use sink::{AnalyticsSink, QuestDbSink};
