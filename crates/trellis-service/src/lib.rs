//! Trellis Service - the transactional operation layer
//!
//! Every externally visible mutation (component trees, domains) is
//! exposed here as an operation that opens a transaction, runs its
//! pipeline in the background, and settles the transaction with either
//! a target id or an error. Reads are plain queries over the store.

#![deny(unsafe_code)]

pub mod component;
pub mod domain;
pub mod error;
pub mod transaction;

pub use component::{ComponentService, Graph};
pub use domain::DomainService;
pub use error::{Result, ServiceError};
pub use transaction::TransactionService;
