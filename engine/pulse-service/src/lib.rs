//! # Pulse Service
//!
//! Composition root for the Pulse ingestion pipeline. Wires the queue store,
//! analytical sink, relational pool, event buffer, telemetry queue, and
//! realtime broadcaster together with an explicit start/shutdown lifecycle.
//! The route layer receives handles to these components; there are no
//! process-wide singletons.

pub mod config;
pub mod logging;
pub mod service;
pub mod signals;

pub use config::{load_configuration, DatabaseConfig, ServiceConfig, StoreConfig};
pub use logging::initialize_logging;
pub use service::ServiceState;
pub use signals::{graceful_shutdown, setup_signal_handlers};
