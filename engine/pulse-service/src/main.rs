//! Pulse Ingestion Service
//!
//! Main entry point for the Pulse analytics ingestion pipeline. It wires the
//! queue store, analytical sink, and relational database into the event
//! buffer, telemetry queue, and realtime broadcaster, then runs until a
//! shutdown signal arrives and drains gracefully.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use pulse_service::{
    graceful_shutdown, initialize_logging, load_configuration, setup_signal_handlers, ServiceState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging first
    initialize_logging()?;

    info!("Starting Pulse Ingestion Service v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = load_configuration().context("Failed to load configuration")?;
    info!("Configuration loaded successfully");

    // Create service state
    let service_state = Arc::new(ServiceState::new(config).await?);
    info!("Service state initialized");

    // Setup signal handlers for graceful shutdown
    let shutdown_signal = setup_signal_handlers()?;
    info!("Signal handlers configured");

    // Start the pipeline timers
    service_state.start().await?;

    // Wait for shutdown signal
    info!("Pulse Ingestion Service is running. Press Ctrl+C to shutdown gracefully.");
    let _ = shutdown_signal.await;

    // Graceful shutdown
    info!("Shutdown signal received. Initiating graceful shutdown...");
    graceful_shutdown(service_state).await?;

    info!("Pulse Ingestion Service shutdown complete");
    Ok(())
}
