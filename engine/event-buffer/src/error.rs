//! Error types for the event buffer

use thiserror::Error;

/// Errors that can occur in the event buffer
#[derive(Error, Debug)]
pub enum BufferError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("event buffer is shutting down")]
    ShuttingDown,

    #[error("store error: {0}")]
    Store(#[from] queue_store::StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sink rejected query: {status} - {body}")]
    SinkRejected { status: u16, body: String },

    #[error("sink timeout after {0}ms")]
    SinkTimeout(u64),

    #[error("sink unreachable: {0}")]
    SinkUnreachable(String),
}

/// Result type for event buffer operations
pub type Result<T> = std::result::Result<T, BufferError>;
