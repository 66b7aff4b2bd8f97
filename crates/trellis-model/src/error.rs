//! Model resolution errors.
//!
//! A `ModelError` always means the user-authored model is structurally
//! invalid. It is surfaced synchronously, before any state mutation,
//! and never retried.

use thiserror::Error;
use trellis_types::CardinalityError;

/// Model validation errors
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Malformed model document: {0}")]
    Malformed(String),

    #[error("Missing required attribute {attr:?} on {on}")]
    MissingAttribute { on: String, attr: String },

    #[error("Disallowed value {value:?} for {attr} on {on}")]
    BadEnum {
        on: String,
        attr: String,
        value: String,
    },

    #[error("Unknown imported type {0:?}")]
    UnknownType(String),

    #[error("Import {name:?} has an unsupported reference {url:?} (expected file://, http:// or https://)")]
    BadImportReference { name: String, url: String },

    #[error("Import {name:?} could not be fetched: {reason}")]
    ImportFetch { name: String, reason: String },

    #[error("Import nesting exceeds the depth limit of {0}")]
    ImportDepth(usize),

    #[error("Connector {connector:?} references undefined subcomponent {subcomponent:?}")]
    DanglingSubcomponent {
        connector: String,
        subcomponent: String,
    },

    #[error("Connector {connector:?} references undefined endpoint {endpoint:?} on {subcomponent:?}")]
    DanglingEndpoint {
        connector: String,
        subcomponent: String,
        endpoint: String,
    },

    #[error("Direction mismatch on connector {connector:?}: {subcomponent}.{endpoint} must be {expected:?}")]
    DirectionMismatch {
        connector: String,
        subcomponent: String,
        endpoint: String,
        expected: trellis_types::Direction,
    },

    #[error("Protocol mismatch on connector {connector:?}: {left:?} vs {right:?}")]
    ProtocolMismatch {
        connector: String,
        left: String,
        right: String,
    },

    #[error("Connector {connector:?} of type Link must have exactly one output and at most one input")]
    BadLinkShape { connector: String },

    #[error("Connector {connector:?} has no inputs and is not the target of a published in-endpoint")]
    OrphanEntryConnector { connector: String },

    #[error("Connector {connector:?}: type {type_name:?} is not an imported basic model")]
    BadConnectorType {
        connector: String,
        type_name: String,
    },

    #[error("Published endpoint {0:?} is invalid: {1}")]
    BadPublishedEndpoint(String, String),

    #[error("Entrypoint {0:?} does not map to a published in-endpoint")]
    BadEntrypoint(String),

    #[error("Cardinality error on {on}: {source}")]
    Cardinality {
        on: String,
        source: CardinalityError,
    },
}

/// Result type for model resolution
pub type Result<T> = std::result::Result<T, ModelError>;
