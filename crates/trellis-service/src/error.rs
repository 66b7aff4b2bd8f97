//! Service error types

use thiserror::Error;
use trellis_domain::DriverError;
use trellis_model::ModelError;
use trellis_scheduler::SchedulerError;
use trellis_store::StoreError;
use trellis_topology::TopologyError;
use trellis_types::TransactionId;

/// Service layer errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transaction {0} already finished")]
    TransactionFinished(TransactionId),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for service operations
pub type Result<T> = std::result::Result<T, ServiceError>;
