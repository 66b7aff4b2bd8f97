//! Trellis Domain - driver contract and implementations
//!
//! Defines the seam between the engine's abstract state (collections,
//! instances, links) and the execution backends hosting them. The
//! reconciliation daemons resolve a domain's `driver` string through
//! the [`DriverRegistry`] and call [`DomainDriver`] operations, all of
//! which must be idempotent.

#![deny(unsafe_code)]

pub mod driver;
pub mod error;
pub mod registry;
pub mod simulated;

pub use driver::DomainDriver;
pub use error::{DriverError, Result};
pub use registry::DriverRegistry;
pub use simulated::SimulatedDriver;
