//! Trellis Types - Core types for component orchestration
//!
//! Trellis turns a declarative composite-component model into a live,
//! internally consistent graph of instances, collections and links,
//! keeps cardinality and placement correct under churn, and drives
//! convergence between the desired model and the state observed in
//! each execution domain.
//!
//! ## Key Concepts
//!
//! - **Model**: resolved component type, a closed sum of basic and
//!   composite
//! - **Instance**: one live realization of a model (or a proxy mirror)
//! - **Collection**: the slot occupied by one subcomponent/connector
//!   inside one composite instance, identified by `(parent, name)`
//! - **Link**: a derived, directed connection between two collections
//! - **Domain**: an independently managed execution environment
//! - **Transaction**: async operation bookkeeping,
//!   `started → completed | aborted`

#![deny(unsafe_code)]

pub mod cardinality;
pub mod collection;
pub mod domain;
pub mod events;
pub mod ids;
pub mod instance;
pub mod link;
pub mod model;
pub mod transaction;

// Re-export main types
pub use cardinality::{Cardinality, CardinalityError};
pub use collection::{Collection, CollectionState};
pub use domain::{Domain, DomainState};
pub use events::{SchedulingEvent, SchedulingEventKind};
pub use ids::{CollectionId, DomainId, InstanceId, LinkId, TransactionId};
pub use instance::{Instance, InstanceKind, InstanceState, SlotName};
pub use link::{Link, LinkState};
pub use model::{
    BasicModel, CompositeModel, Connector, ConnectorKind, Direction, Durability, Endpoint,
    EndpointRef, Entrypoint, Model, PublishedEndpoint, Subcomponent,
};
pub use transaction::{Transaction, TransactionState};
