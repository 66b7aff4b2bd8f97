//! Topology error types

use thiserror::Error;
use trellis_scheduler::SchedulerError;
use trellis_store::StoreError;

/// Topology construction errors
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Root model must be composite")]
    RootNotComposite,

    #[error("Not found: {0}")]
    NotFound(String),

    /// An internal invariant was violated. Never swallowed: a link with
    /// an empty endpoint name is an adjacency bug, not a user error.
    #[error("Internal invariant violation: {0}")]
    Internal(String),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for topology operations
pub type Result<T> = std::result::Result<T, TopologyError>;
