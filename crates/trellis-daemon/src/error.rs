//! Daemon error types

use thiserror::Error;
use trellis_domain::DriverError;
use trellis_scheduler::SchedulerError;
use trellis_service::ServiceError;
use trellis_store::StoreError;
use trellis_topology::TopologyError;

/// Daemon errors
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
}

/// Result type for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;
