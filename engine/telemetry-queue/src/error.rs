//! Error types for the telemetry queue

use thiserror::Error;

/// Errors that can occur in the telemetry queue
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("store error: {0}")]
    Store(#[from] queue_store::StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("job queue is closed")]
    Closed,
}

/// Result type for telemetry queue operations
pub type Result<T> = std::result::Result<T, QueueError>;
