//! Store error types

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Lock on {0} not acquired within the retry budget")]
    LockTimeout(String),

    #[error("Retry loop {0} exceeded its budget")]
    LoopTimeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
