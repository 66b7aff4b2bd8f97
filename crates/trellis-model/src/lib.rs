//! Trellis Model - resolution of declarative component models
//!
//! Turns user-authored model documents plus deployment overrides into
//! validated, fully-typed [`trellis_types::Model`] values: variable
//! substitution, recursive import fetching, connector wiring
//! validation, published endpoint resolution and entrypoint push-down.
//!
//! Validation happens before any engine state is touched; a
//! [`ModelError`] is always a user error, never retried.

#![deny(unsafe_code)]

pub mod error;
pub mod fetch;
pub mod raw;
pub mod resolver;
pub mod template;

pub use error::{ModelError, Result};
pub use raw::{Deployment, RawEntrypoint, RawImport, RawModel};
pub use resolver::ModelResolver;
