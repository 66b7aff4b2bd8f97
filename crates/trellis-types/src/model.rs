//! Resolved component models.
//!
//! A model is immutable once resolved. The two kinds form a closed sum:
//! a *basic* model is a leaf realized by runtime instances on a domain,
//! a *composite* model wires subcomponents and connectors together by
//! typed endpoints. Connector kinds are likewise a closed sum so every
//! consumer matches exhaustively instead of inspecting type strings.

use crate::cardinality::Cardinality;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Endpoint direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// The mirror direction.
    pub fn opposite(&self) -> Self {
        match self {
            Direction::In => Direction::Out,
            Direction::Out => Direction::In,
        }
    }
}

/// Instance durability across restarts of its domain resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    #[default]
    Ephemeral,
    Permanent,
}

/// A named, directional, protocol-typed connection point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub direction: Direction,

    /// Protocol tag, compared case-insensitively (e.g. `tcp:80`).
    pub protocol: String,
}

impl Endpoint {
    /// Case-insensitive protocol comparison.
    pub fn protocol_matches(&self, other: &str) -> bool {
        self.protocol.eq_ignore_ascii_case(other)
    }
}

/// A leaf component type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicModel {
    /// Runtime required to host instances of this type.
    pub runtime: String,

    /// Source artifact (image reference, archive, ...).
    pub source: String,

    #[serde(default)]
    pub durability: Durability,

    #[serde(default)]
    pub endpoints: BTreeMap<String, Endpoint>,

    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,

    /// Volume name to mount path.
    #[serde(default)]
    pub volumes: BTreeMap<String, String>,

    /// Event topics this component emits or consumes.
    #[serde(default)]
    pub events: Vec<String>,
}

/// One subcomponent slot of a composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subcomponent {
    /// Name of the imported type backing this slot.
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub cardinality: Cardinality,

    #[serde(default)]
    pub durability: Durability,

    /// Domain allow-list; empty means inherited from the composite.
    #[serde(default)]
    pub domains: Vec<String>,

    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,

    /// Optional scheduling hint passed through to the domain driver.
    #[serde(default)]
    pub schedule: Option<String>,
}

/// Reference to one endpoint of one subcomponent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointRef {
    pub subcomponent: String,
    pub endpoint: String,
}

impl EndpointRef {
    pub fn new(subcomponent: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            subcomponent: subcomponent.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// Connector kind.
///
/// `Link` is a transparent 1:1 pass-through with no runtime
/// representation. `Native` connectors are backed by an imported basic
/// type and form their own collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    Link,
    Native(String),
}

/// Public exposure of a published `in` endpoint, pushed down from the
/// deployment onto the underlying connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entrypoint {
    pub protocol: String,
    pub path: String,

    /// Name of the published endpoint this entrypoint maps to.
    pub mapping: String,
}

/// A wiring element between subcomponent endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub kind: ConnectorKind,

    /// Destinations; each must be an `in`-typed endpoint and all must
    /// share one protocol.
    #[serde(default)]
    pub outputs: Vec<EndpointRef>,

    /// Sources; each must be an `out`-typed endpoint matching the
    /// output protocol. Empty only for composite entry points.
    #[serde(default)]
    pub inputs: Vec<EndpointRef>,

    #[serde(default)]
    pub entrypoints: BTreeMap<String, Entrypoint>,
}

/// A published endpoint on the composite boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishedEndpoint {
    /// Published `in` endpoint, mapped to exactly one internal connector.
    In { connector: String, protocol: String },

    /// Published `out` endpoint, mapped to one or more internal
    /// `(subcomponent, endpoint)` pairs sharing one protocol.
    Out {
        mappings: Vec<EndpointRef>,
        protocol: String,
    },
}

impl PublishedEndpoint {
    pub fn direction(&self) -> Direction {
        match self {
            PublishedEndpoint::In { .. } => Direction::In,
            PublishedEndpoint::Out { .. } => Direction::Out,
        }
    }

    pub fn protocol(&self) -> &str {
        match self {
            PublishedEndpoint::In { protocol, .. } => protocol,
            PublishedEndpoint::Out { protocol, .. } => protocol,
        }
    }
}

/// A component type defined by wiring subcomponents and connectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeModel {
    /// Resolved imported types, keyed by type name.
    #[serde(default)]
    pub imports: BTreeMap<String, Model>,

    #[serde(default)]
    pub subcomponents: BTreeMap<String, Subcomponent>,

    #[serde(default)]
    pub connectors: BTreeMap<String, Connector>,

    #[serde(default)]
    pub endpoints: BTreeMap<String, PublishedEndpoint>,

    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,

    /// Domain allow-list inherited by subcomponents that declare none.
    #[serde(default)]
    pub domains: Vec<String>,
}

/// A resolved component model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Model {
    Basic(BasicModel),
    Composite(CompositeModel),
}

impl Model {
    pub fn is_basic(&self) -> bool {
        matches!(self, Model::Basic(_))
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Model::Composite(_))
    }

    pub fn as_basic(&self) -> Option<&BasicModel> {
        match self {
            Model::Basic(basic) => Some(basic),
            Model::Composite(_) => None,
        }
    }

    pub fn as_composite(&self) -> Option<&CompositeModel> {
        match self {
            Model::Basic(_) => None,
            Model::Composite(composite) => Some(composite),
        }
    }

    /// Look up the direction and protocol of a named endpoint on this
    /// type's boundary, whichever kind it is.
    pub fn endpoint(&self, name: &str) -> Option<(Direction, &str)> {
        match self {
            Model::Basic(basic) => basic
                .endpoints
                .get(name)
                .map(|endpoint| (endpoint.direction, endpoint.protocol.as_str())),
            Model::Composite(composite) => composite
                .endpoints
                .get(name)
                .map(|published| (published.direction(), published.protocol())),
        }
    }
}

impl CompositeModel {
    /// The resolved model backing a subcomponent slot, if both the slot
    /// and its import exist.
    pub fn subcomponent_model(&self, name: &str) -> Option<&Model> {
        let sub = self.subcomponents.get(name)?;
        self.imports.get(&sub.type_name)
    }

    /// The resolved basic model backing a native connector slot.
    pub fn connector_model(&self, name: &str) -> Option<&Model> {
        match &self.connectors.get(name)?.kind {
            ConnectorKind::Link => None,
            ConnectorKind::Native(type_name) => self.imports.get(type_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_with_endpoint(name: &str, direction: Direction, protocol: &str) -> Model {
        let mut endpoints = BTreeMap::new();
        endpoints.insert(
            name.to_string(),
            Endpoint {
                direction,
                protocol: protocol.to_string(),
            },
        );
        Model::Basic(BasicModel {
            runtime: "docker".into(),
            source: "registry/app:1".into(),
            durability: Durability::Ephemeral,
            endpoints,
            variables: BTreeMap::new(),
            volumes: BTreeMap::new(),
            events: Vec::new(),
        })
    }

    #[test]
    fn endpoint_lookup_is_kind_agnostic() {
        let basic = basic_with_endpoint("svc", Direction::In, "tcp:80");
        assert_eq!(basic.endpoint("svc"), Some((Direction::In, "tcp:80")));
        assert_eq!(basic.endpoint("missing"), None);

        let composite = Model::Composite(CompositeModel {
            imports: BTreeMap::new(),
            subcomponents: BTreeMap::new(),
            connectors: BTreeMap::new(),
            endpoints: [(
                "pub".to_string(),
                PublishedEndpoint::In {
                    connector: "front".into(),
                    protocol: "http".into(),
                },
            )]
            .into_iter()
            .collect(),
            variables: BTreeMap::new(),
            domains: Vec::new(),
        });
        assert_eq!(composite.endpoint("pub"), Some((Direction::In, "http")));
    }

    #[test]
    fn model_serde_is_tagged() {
        let model = basic_with_endpoint("svc", Direction::Out, "tcp:80");
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["type"], "basic");
        let back: Model = serde_json::from_value(json).unwrap();
        assert_eq!(back, model);
    }
}
