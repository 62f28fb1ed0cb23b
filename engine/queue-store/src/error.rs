//! Error types for queue store operations

use thiserror::Error;

/// Errors that can occur when talking to the queue store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store operation timed out: {0}")]
    Timeout(String),

    #[error("unexpected value type for key {0}")]
    WrongType(String),

    #[error("store error: {0}")]
    Other(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout(err.to_string())
        } else if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Other(err.to_string())
        }
    }
}

/// Result type for queue store operations
pub type Result<T> = std::result::Result<T, StoreError>;
