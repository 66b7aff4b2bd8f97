//! Trellis Topology - tree building, adjacency resolution, link
//! materialization
//!
//! Turns a resolved composite model into persisted state: the instance
//! tree and its collections (`TreeBuilder`), the links between
//! collections implied by the model's wiring (`AdjacencyResolver` and
//! `TreeConnector`), and the two-phase destruction flags. All writes go
//! through the store; domains are touched only later, by the
//! reconciliation daemons.

#![deny(unsafe_code)]

pub mod adjacency;
pub mod builder;
pub mod connector;
pub mod error;

pub use adjacency::{Adjacent, AdjacencyResolver, EndpointSelector};
pub use builder::{BuiltTree, TreeBuilder};
pub use connector::TreeConnector;
pub use error::{Result, TopologyError};
