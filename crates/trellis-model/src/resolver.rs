//! Model resolution.
//!
//! `resolve(deployment, raw)` turns a user-authored document plus
//! deployment overrides into a validated [`Model`]. Resolution is pure
//! with respect to engine state: it mutates nothing and either returns
//! a fully-typed model or a [`ModelError`] before anything else runs.

use crate::error::{ModelError, Result};
use crate::fetch::fetch_reference;
use crate::raw::{
    Deployment, RawBasic, RawComposite, RawConnector, RawEndpointRef, RawImport, RawModel,
    RawPublishedEndpoint, RawSubcomponent,
};
use crate::template;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeMap;
use trellis_types::{
    BasicModel, Cardinality, CompositeModel, Connector, ConnectorKind, Direction, Durability,
    Endpoint, EndpointRef, Entrypoint, Model, PublishedEndpoint, Subcomponent,
};

/// Nesting guard for URL imports.
const MAX_IMPORT_DEPTH: usize = 32;

/// Reserved connector type: a transparent 1:1 pass-through.
const LINK_TYPE: &str = "Link";

/// Resolves raw model documents into typed models.
pub struct ModelResolver {
    client: reqwest::Client,
}

impl Default for ModelResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelResolver {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Resolve a raw model document under deployment overrides.
    pub async fn resolve(&self, deployment: &Deployment, raw: Value) -> Result<Model> {
        let mut model = self.resolve_value(&deployment.variables, raw, 0).await?;

        if !deployment.entrypoints.is_empty() {
            let Model::Composite(composite) = &mut model else {
                return Err(ModelError::BadEntrypoint(
                    deployment.entrypoints.keys().next().cloned().unwrap_or_default(),
                ));
            };
            push_down_entrypoints(composite, deployment)?;
        }
        Ok(model)
    }

    fn resolve_value<'a>(
        &'a self,
        overrides: &'a BTreeMap<String, Value>,
        mut raw: Value,
        depth: usize,
    ) -> BoxFuture<'a, Result<Model>> {
        Box::pin(async move {
            if depth > MAX_IMPORT_DEPTH {
                return Err(ModelError::ImportDepth(MAX_IMPORT_DEPTH));
            }

            // Merge deployment variables over the model's own, then
            // substitute placeholders across every string attribute.
            let mut merged: BTreeMap<String, Value> = raw
                .get("variables")
                .and_then(Value::as_object)
                .map(|vars| vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();
            merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
            template::substitute_tree(&mut raw, &merged);

            let parsed: RawModel = serde_json::from_value(raw)
                .map_err(|err| ModelError::Malformed(err.to_string()))?;

            match parsed {
                RawModel::Basic(basic) => resolve_basic(basic),
                RawModel::Composite(composite) => {
                    self.resolve_composite(overrides, composite, depth).await
                }
            }
        })
    }

    async fn resolve_composite(
        &self,
        overrides: &BTreeMap<String, Value>,
        raw: RawComposite,
        depth: usize,
    ) -> Result<Model> {
        let mut imports = BTreeMap::new();
        for (name, import) in raw.imports {
            let model = match import {
                RawImport::Inline(model) => *model,
                RawImport::Reference(url) => {
                    tracing::debug!(import = %name, url = %url, "fetching import");
                    let doc = fetch_reference(&self.client, &name, &url).await?;
                    self.resolve_value(overrides, doc, depth + 1).await?
                }
            };
            imports.insert(name, model);
        }

        let mut subcomponents = BTreeMap::new();
        for (name, sub) in raw.subcomponents {
            subcomponents.insert(name.clone(), resolve_subcomponent(&name, sub, &imports)?);
        }

        let mut connectors = BTreeMap::new();
        for (name, connector) in &raw.connectors {
            connectors.insert(
                name.clone(),
                resolve_connector(name, connector, &subcomponents, &imports)?,
            );
        }

        let mut endpoints = BTreeMap::new();
        for (name, published) in &raw.endpoints {
            endpoints.insert(
                name.clone(),
                resolve_published(name, published, &subcomponents, &imports, &connectors)?,
            );
        }

        // A connector with no inputs is legal only as the target of a
        // published in-endpoint (the composite's entry point).
        for (name, connector) in &connectors {
            if connector.inputs.is_empty() {
                let is_entry = endpoints.values().any(|published| {
                    matches!(published, PublishedEndpoint::In { connector: target, .. } if target == name)
                });
                if !is_entry {
                    return Err(ModelError::OrphanEntryConnector {
                        connector: name.clone(),
                    });
                }
            }
        }

        Ok(Model::Composite(CompositeModel {
            imports,
            subcomponents,
            connectors,
            endpoints,
            variables: raw.variables,
            domains: raw.domains,
        }))
    }
}

fn parse_durability(on: &str, value: Option<&str>) -> Result<Durability> {
    match value {
        None => Ok(Durability::default()),
        Some(s) if s.eq_ignore_ascii_case("ephemeral") => Ok(Durability::Ephemeral),
        Some(s) if s.eq_ignore_ascii_case("permanent") => Ok(Durability::Permanent),
        Some(other) => Err(ModelError::BadEnum {
            on: on.to_string(),
            attr: "durability".into(),
            value: other.to_string(),
        }),
    }
}

fn parse_direction(on: &str, value: &str) -> Result<Direction> {
    match value {
        s if s.eq_ignore_ascii_case("in") => Ok(Direction::In),
        s if s.eq_ignore_ascii_case("out") => Ok(Direction::Out),
        other => Err(ModelError::BadEnum {
            on: on.to_string(),
            attr: "direction".into(),
            value: other.to_string(),
        }),
    }
}

fn resolve_basic(raw: RawBasic) -> Result<Model> {
    if raw.runtime.trim().is_empty() {
        return Err(ModelError::MissingAttribute {
            on: "basic model".into(),
            attr: "runtime".into(),
        });
    }
    if raw.source.trim().is_empty() {
        return Err(ModelError::MissingAttribute {
            on: "basic model".into(),
            attr: "source".into(),
        });
    }

    let mut endpoints = BTreeMap::new();
    for (name, endpoint) in raw.endpoints {
        if endpoint.protocol.trim().is_empty() {
            return Err(ModelError::MissingAttribute {
                on: format!("endpoint {name:?}"),
                attr: "protocol".into(),
            });
        }
        let direction = parse_direction(&format!("endpoint {name:?}"), &endpoint.direction)?;
        endpoints.insert(
            name,
            Endpoint {
                direction,
                protocol: endpoint.protocol,
            },
        );
    }

    Ok(Model::Basic(BasicModel {
        runtime: raw.runtime,
        source: raw.source,
        durability: parse_durability("basic model", raw.durability.as_deref())?,
        endpoints,
        variables: raw.variables,
        volumes: raw.volumes,
        events: raw.events,
    }))
}

fn resolve_subcomponent(
    name: &str,
    raw: RawSubcomponent,
    imports: &BTreeMap<String, Model>,
) -> Result<Subcomponent> {
    if !imports.contains_key(&raw.type_name) {
        return Err(ModelError::UnknownType(raw.type_name));
    }
    let cardinality = match &raw.cardinality {
        None => Cardinality::default(),
        Some(text) => text.parse().map_err(|source| ModelError::Cardinality {
            on: format!("subcomponent {name:?}"),
            source,
        })?,
    };
    Ok(Subcomponent {
        type_name: raw.type_name,
        cardinality,
        durability: parse_durability(&format!("subcomponent {name:?}"), raw.durability.as_deref())?,
        domains: raw.domains,
        variables: raw.variables,
        schedule: raw.schedule,
    })
}

/// Direction and protocol of `sub.endpoint` on the referenced
/// subcomponent's boundary, with connector-flavored errors.
fn endpoint_of<'m>(
    connector: &str,
    reference: &RawEndpointRef,
    subcomponents: &BTreeMap<String, Subcomponent>,
    imports: &'m BTreeMap<String, Model>,
) -> Result<(Direction, &'m str)> {
    let sub = subcomponents
        .get(&reference.subcomponent)
        .ok_or_else(|| ModelError::DanglingSubcomponent {
            connector: connector.to_string(),
            subcomponent: reference.subcomponent.clone(),
        })?;
    let model = imports
        .get(&sub.type_name)
        .ok_or_else(|| ModelError::UnknownType(sub.type_name.clone()))?;
    model
        .endpoint(&reference.endpoint)
        .ok_or_else(|| ModelError::DanglingEndpoint {
            connector: connector.to_string(),
            subcomponent: reference.subcomponent.clone(),
            endpoint: reference.endpoint.clone(),
        })
}

fn resolve_connector(
    name: &str,
    raw: &RawConnector,
    subcomponents: &BTreeMap<String, Subcomponent>,
    imports: &BTreeMap<String, Model>,
) -> Result<Connector> {
    // Every output targets an in-endpoint; all outputs share one
    // protocol (case-insensitively).
    let mut protocol: Option<String> = None;
    for output in &raw.outputs {
        let (direction, found) = endpoint_of(name, output, subcomponents, imports)?;
        if direction != Direction::In {
            return Err(ModelError::DirectionMismatch {
                connector: name.to_string(),
                subcomponent: output.subcomponent.clone(),
                endpoint: output.endpoint.clone(),
                expected: Direction::In,
            });
        }
        match &protocol {
            None => protocol = Some(found.to_string()),
            Some(existing) if existing.eq_ignore_ascii_case(found) => {}
            Some(existing) => {
                return Err(ModelError::ProtocolMismatch {
                    connector: name.to_string(),
                    left: existing.clone(),
                    right: found.to_string(),
                })
            }
        }
    }
    // No outputs means no protocol was ever observed.
    let protocol = protocol.ok_or_else(|| ModelError::MissingAttribute {
        on: format!("connector {name:?}"),
        attr: "outputs".into(),
    })?;

    // Every input is an out-endpoint matching the output protocol.
    for input in &raw.inputs {
        let (direction, found) = endpoint_of(name, input, subcomponents, imports)?;
        if direction != Direction::Out {
            return Err(ModelError::DirectionMismatch {
                connector: name.to_string(),
                subcomponent: input.subcomponent.clone(),
                endpoint: input.endpoint.clone(),
                expected: Direction::Out,
            });
        }
        if !protocol.eq_ignore_ascii_case(found) {
            return Err(ModelError::ProtocolMismatch {
                connector: name.to_string(),
                left: protocol.clone(),
                right: found.to_string(),
            });
        }
    }

    let kind = if raw.type_name == LINK_TYPE {
        if raw.outputs.len() != 1 || raw.inputs.len() > 1 {
            return Err(ModelError::BadLinkShape {
                connector: name.to_string(),
            });
        }
        ConnectorKind::Link
    } else {
        let model = imports
            .get(&raw.type_name)
            .ok_or_else(|| ModelError::BadConnectorType {
                connector: name.to_string(),
                type_name: raw.type_name.clone(),
            })?;
        let Model::Basic(basic) = model else {
            return Err(ModelError::BadConnectorType {
                connector: name.to_string(),
                type_name: raw.type_name.clone(),
            });
        };
        // A native connector needs one endpoint facing each way, on the
        // connector's protocol, for adjacency to be well-defined.
        for direction in [Direction::In, Direction::Out] {
            let matching = basic.endpoints.values().filter(|endpoint| {
                endpoint.direction == direction && endpoint.protocol_matches(&protocol)
            });
            if matching.count() != 1 {
                return Err(ModelError::BadConnectorType {
                    connector: name.to_string(),
                    type_name: raw.type_name.clone(),
                });
            }
        }
        ConnectorKind::Native(raw.type_name.clone())
    };

    Ok(Connector {
        kind,
        outputs: raw
            .outputs
            .iter()
            .map(|r| EndpointRef::new(&r.subcomponent, &r.endpoint))
            .collect(),
        inputs: raw
            .inputs
            .iter()
            .map(|r| EndpointRef::new(&r.subcomponent, &r.endpoint))
            .collect(),
        entrypoints: BTreeMap::new(),
    })
}

fn resolve_published(
    name: &str,
    raw: &RawPublishedEndpoint,
    subcomponents: &BTreeMap<String, Subcomponent>,
    imports: &BTreeMap<String, Model>,
    connectors: &BTreeMap<String, Connector>,
) -> Result<PublishedEndpoint> {
    match parse_direction(&format!("published endpoint {name:?}"), &raw.direction)? {
        Direction::In => {
            let target = raw.connector.as_deref().ok_or_else(|| {
                ModelError::BadPublishedEndpoint(name.to_string(), "missing connector".into())
            })?;
            let connector = connectors.get(target).ok_or_else(|| {
                ModelError::BadPublishedEndpoint(
                    name.to_string(),
                    format!("unknown connector {target:?}"),
                )
            })?;
            // The published protocol is the connector's output protocol
            // chain; recover it from the first output.
            let output = connector.outputs.first().ok_or_else(|| {
                ModelError::BadPublishedEndpoint(
                    name.to_string(),
                    format!("connector {target:?} has no outputs"),
                )
            })?;
            let (_, protocol) = endpoint_of(
                target,
                &RawEndpointRef {
                    subcomponent: output.subcomponent.clone(),
                    endpoint: output.endpoint.clone(),
                },
                subcomponents,
                imports,
            )?;
            Ok(PublishedEndpoint::In {
                connector: target.to_string(),
                protocol: protocol.to_string(),
            })
        }
        Direction::Out => {
            if raw.mappings.is_empty() {
                return Err(ModelError::BadPublishedEndpoint(
                    name.to_string(),
                    "out endpoint requires at least one mapping".into(),
                ));
            }
            let mut protocol: Option<String> = None;
            for mapping in &raw.mappings {
                let (direction, found) =
                    endpoint_of(&format!("endpoint {name:?}"), mapping, subcomponents, imports)?;
                if direction != Direction::Out {
                    return Err(ModelError::BadPublishedEndpoint(
                        name.to_string(),
                        format!(
                            "{}.{} is not an out endpoint",
                            mapping.subcomponent, mapping.endpoint
                        ),
                    ));
                }
                match &protocol {
                    None => protocol = Some(found.to_string()),
                    Some(existing) if existing.eq_ignore_ascii_case(found) => {}
                    Some(existing) => {
                        return Err(ModelError::ProtocolMismatch {
                            connector: format!("endpoint {name:?}"),
                            left: existing.clone(),
                            right: found.to_string(),
                        })
                    }
                }
            }
            Ok(PublishedEndpoint::Out {
                mappings: raw
                    .mappings
                    .iter()
                    .map(|r| EndpointRef::new(&r.subcomponent, &r.endpoint))
                    .collect(),
                protocol: protocol.expect("mappings checked non-empty"),
            })
        }
    }
}

/// Push deployment entrypoints down onto their underlying connectors.
fn push_down_entrypoints(composite: &mut CompositeModel, deployment: &Deployment) -> Result<()> {
    for (name, entry) in &deployment.entrypoints {
        let Some(PublishedEndpoint::In { connector, protocol }) =
            composite.endpoints.get(&entry.endpoint)
        else {
            return Err(ModelError::BadEntrypoint(name.clone()));
        };
        let protocol = entry.protocol.clone().unwrap_or_else(|| protocol.clone());
        let target = connector.clone();
        let connector = composite
            .connectors
            .get_mut(&target)
            .ok_or_else(|| ModelError::BadEntrypoint(name.clone()))?;
        connector.entrypoints.insert(
            name.clone(),
            Entrypoint {
                protocol,
                path: entry.path.clone().unwrap_or_else(|| "/".into()),
                mapping: entry.endpoint.clone(),
            },
        );
    }
    Ok(())
}
