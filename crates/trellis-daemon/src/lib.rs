//! Trellis Daemon - background reconciliation
//!
//! Two periodic daemons converge recorded state and reality from
//! opposite ends: the schedule daemon re-runs scaling decisions over
//! recently touched composite instances, the projection daemon pushes
//! collections, members, proxies and links onto the execution domains
//! and reaps everything flagged for destruction. Both loops are
//! idempotent per pass and stop cleanly between passes.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod projection;
pub mod schedule;

pub use config::{DaemonConfig, LoggingConfig, ProjectionConfig, ScheduleConfig};
pub use error::{DaemonError, Result};
pub use projection::ProjectionDaemon;
pub use schedule::ScheduleDaemon;
