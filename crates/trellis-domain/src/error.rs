//! Domain driver error types

use thiserror::Error;

/// Domain driver errors
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("No driver registered under {0:?}")]
    UnknownDriver(String),

    #[error("Domain unreachable: {0}")]
    Unreachable(String),

    #[error("Driver operation failed: {0}")]
    Failed(String),
}

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, DriverError>;
