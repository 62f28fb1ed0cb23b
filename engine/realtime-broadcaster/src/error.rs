//! Error types for the realtime broadcaster

use thiserror::Error;

/// Errors that can occur in the realtime broadcaster
#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("online users unavailable: {0}")]
    ProviderUnavailable(String),
}

/// Result type for broadcaster operations
pub type Result<T> = std::result::Result<T, BroadcastError>;
