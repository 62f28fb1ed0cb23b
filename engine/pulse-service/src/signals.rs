//! Signal handling for graceful shutdown

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::service::ServiceState;

/// Setup signal handlers for graceful shutdown. The returned receiver
/// resolves on the first SIGINT or SIGTERM.
pub fn setup_signal_handlers() -> Result<oneshot::Receiver<()>> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let (signal_tx, mut signal_rx) = tokio::sync::mpsc::channel::<&'static str>(2);

    // Handle Ctrl+C (SIGINT)
    {
        let signal_tx = signal_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C signal: {}", e);
                return;
            }
            let _ = signal_tx.send("SIGINT").await;
        });
    }

    // Handle SIGTERM (Unix only)
    #[cfg(unix)]
    tokio::spawn(async move {
        use signal_hook::consts::SIGTERM;
        use std::sync::atomic::{AtomicBool, Ordering};

        let shutdown_flag = Arc::new(AtomicBool::new(false));
        if let Err(e) = signal_hook::flag::register(SIGTERM, shutdown_flag.clone()) {
            error!("Failed to register SIGTERM handler: {}", e);
            return;
        }

        loop {
            if shutdown_flag.load(Ordering::Relaxed) {
                let _ = signal_tx.send("SIGTERM").await;
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
    });

    tokio::spawn(async move {
        if let Some(signal) = signal_rx.recv().await {
            info!("{} signal received", signal);
            let _ = shutdown_tx.send(());
        }
    });

    Ok(shutdown_rx)
}

/// Graceful shutdown: stop fan-out first, then drain both buffers so
/// nothing accepted before the signal is silently lost.
pub async fn graceful_shutdown(service_state: Arc<ServiceState>) -> Result<()> {
    info!("Starting graceful shutdown...");

    if let Err(e) = service_state.shutdown().await {
        error!("Failed to shutdown service components: {}", e);
    }

    info!("Graceful shutdown complete");
    Ok(())
}
