//! Trellis Store - document store contract and helpers
//!
//! The engine persists everything through a narrow document-store seam:
//! `search`/`insert`/`update`/`delete` with query predicates,
//! ordering/limit options and optimistic per-record lock tokens. This
//! crate defines that seam, a typed access layer over it, the bounded
//! retry and structured-join primitives the daemons build on, and an
//! in-memory backend for development and testing.

#![deny(unsafe_code)]

pub mod error;
pub mod join;
pub mod lock;
pub mod memory;
pub mod query;
pub mod records;
pub mod retry;
pub mod store;

pub use error::{Result, StoreError};
pub use join::join_settled;
pub use lock::CollectionGuard;
pub use memory::MemoryStore;
pub use query::{Predicate, Query, SearchOptions, SortOrder, UpdateOptions};
pub use retry::{retry_until, RetryPolicy};
pub use store::{Datastore, Record, Store};
