//! Scheduler error types

use thiserror::Error;
use trellis_store::StoreError;
use trellis_types::{InstanceId, SlotName};

/// Scheduler errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Instance {0} is not a composite with a resolved model")]
    NotComposite(InstanceId),

    #[error("Instance {parent} has no slot {slot}")]
    UnknownSlot { parent: InstanceId, slot: SlotName },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for scheduling operations
pub type Result<T> = std::result::Result<T, SchedulerError>;
