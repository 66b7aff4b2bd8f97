//! Trellis Scheduler - scaling and placement decisions
//!
//! A stateless decision function over store snapshots: given one slot
//! of one composite instance, it compares the resolved cardinality
//! range and the last observed CPU metric against the live member
//! count and emits `InstanceAdd`/`InstanceRemove` events. Placement of
//! basic additions spreads replicas least-loaded-first across eligible
//! domains.
//!
//! The scheduler is invoked by the tree builder during construction
//! and by the schedule daemon during reconciliation; it never mutates
//! the store itself.

#![deny(unsafe_code)]

pub mod error;
pub mod placement;
pub mod scheduler;

pub use error::{Result, SchedulerError};
pub use placement::Placement;
pub use scheduler::{Scheduler, MIN_REPLICAS, SCALE_DOWN_CPU, SCALE_UP_CPU};
