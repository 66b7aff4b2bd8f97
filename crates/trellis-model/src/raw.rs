//! Unresolved model documents as authored by users.
//!
//! Raw forms keep enum-like attributes as strings and cardinalities in
//! the `[min:max]` literal syntax; the resolver validates them into the
//! typed forms. Inline imports are already-resolved models and are used
//! as-is; reference imports name a `file://` or `http(s)://` document.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use trellis_types::Model;

/// A raw model document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RawModel {
    Basic(RawBasic),
    Composite(RawComposite),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBasic {
    pub runtime: String,

    pub source: String,

    #[serde(default)]
    pub durability: Option<String>,

    #[serde(default)]
    pub endpoints: BTreeMap<String, RawEndpoint>,

    #[serde(default)]
    pub variables: BTreeMap<String, Value>,

    #[serde(default)]
    pub volumes: BTreeMap<String, String>,

    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEndpoint {
    pub direction: String,
    pub protocol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawComposite {
    #[serde(default)]
    pub imports: BTreeMap<String, RawImport>,

    #[serde(default)]
    pub subcomponents: BTreeMap<String, RawSubcomponent>,

    #[serde(default)]
    pub connectors: BTreeMap<String, RawConnector>,

    #[serde(default)]
    pub endpoints: BTreeMap<String, RawPublishedEndpoint>,

    #[serde(default)]
    pub variables: BTreeMap<String, Value>,

    #[serde(default)]
    pub domains: Vec<String>,
}

/// An import: either a URL reference to fetch and resolve, or an inline
/// already-resolved model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawImport {
    Reference(String),
    Inline(Box<Model>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSubcomponent {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub cardinality: Option<String>,

    #[serde(default)]
    pub durability: Option<String>,

    #[serde(default)]
    pub domains: Vec<String>,

    #[serde(default)]
    pub variables: BTreeMap<String, Value>,

    #[serde(default)]
    pub schedule: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConnector {
    /// `Link` or the name of an imported basic type.
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub outputs: Vec<RawEndpointRef>,

    #[serde(default)]
    pub inputs: Vec<RawEndpointRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEndpointRef {
    pub subcomponent: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPublishedEndpoint {
    pub direction: String,

    /// Target connector, published `in` endpoints only.
    #[serde(default)]
    pub connector: Option<String>,

    /// Internal mappings, published `out` endpoints only.
    #[serde(default)]
    pub mappings: Vec<RawEndpointRef>,
}

/// Deployment-level overrides applied during resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Deployment {
    /// Win over the model's own variables.
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,

    /// Public exposures, keyed by entrypoint name.
    #[serde(default)]
    pub entrypoints: BTreeMap<String, RawEntrypoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEntrypoint {
    /// Published `in` endpoint this entrypoint exposes.
    pub endpoint: String,

    #[serde(default)]
    pub protocol: Option<String>,

    #[serde(default)]
    pub path: Option<String>,
}
