//! Adjacency resolution.
//!
//! Given one endpoint of one slot, find every collection on the other
//! side it must be linked to. Three traversal cases apply, mirrored
//! for the two directions:
//!
//! 1. same level, direct: a `Link` connector short-circuits its two
//!    sides; a native connector is itself the adjacent node
//! 2. same level, through a composite subcomponent: descend into the
//!    child instance's model following the boundary endpoint mapping
//! 3. across the composite boundary, upward: when the endpoint is also
//!    published on the enclosing composite, recurse one level up and
//!    correct the local endpoint name to the local viewpoint
//!
//! Every boundary-crossing search runs on one explicit work queue
//! (breadth-first): the number of hops is not bounded by nesting depth
//! alone, and published out-endpoints fan out to multiple leaves.
//!
//! An endpoint with no resolvable adjacents is legal and yields an
//! empty list. Duplicate tuples are the caller's problem.

use crate::error::{Result, TopologyError};
use std::collections::{HashSet, VecDeque};
use trellis_store::{Datastore, Predicate, Query, SearchOptions};
use trellis_types::{
    BasicModel, CollectionId, CompositeModel, Connector, ConnectorKind, Direction, EndpointRef,
    Instance, InstanceState, Model, PublishedEndpoint, SlotName,
};

/// One endpoint (or connector side) to search from.
#[derive(Debug, Clone)]
pub struct EndpointSelector {
    pub slot: SlotName,

    /// Endpoint name; required for subcomponent slots, ignored for
    /// connector slots (the connector's own endpoints are implied).
    pub endpoint: Option<String>,

    pub direction: Direction,
}

/// One collection the searched endpoint must be linked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjacent {
    pub collection: CollectionId,

    /// Endpoint name from the searcher's local viewpoint.
    pub local_name: String,

    /// Endpoint name on the adjacent collection.
    pub remote_name: String,
}

/// Work-queue steps of the traversal.
#[derive(Debug)]
enum Step {
    /// Follow the out-endpoint `endpoint` of subcomponent `sub` within
    /// `scope`.
    OutFrom {
        scope: Instance,
        sub: String,
        endpoint: String,
        local: String,
    },
    /// Follow the out side of native connector `connector` within
    /// `scope`.
    OutFromConnector {
        scope: Instance,
        connector: String,
        local: String,
    },
    /// Find the producers feeding the in-endpoint `endpoint` of
    /// subcomponent `sub` within `scope`.
    InFrom {
        scope: Instance,
        sub: String,
        endpoint: String,
        local: String,
    },
    /// Find the producers feeding the in side of native connector
    /// `connector` within `scope`.
    InFromConnector {
        scope: Instance,
        connector: String,
        local: String,
    },
    /// Descend through published in-endpoint `published` of composite
    /// instance `scope`.
    IntoIn {
        scope: Instance,
        published: String,
        local: String,
    },
    /// Descend through published out-endpoint `published` of composite
    /// instance `scope` (fan-out).
    IntoOut {
        scope: Instance,
        published: String,
        local: String,
    },
}

impl Step {
    fn visit_key(&self) -> String {
        match self {
            Step::OutFrom { scope, sub, endpoint, .. } => {
                format!("out/{}/{sub}/{endpoint}", scope.id)
            }
            Step::OutFromConnector { scope, connector, .. } => {
                format!("outc/{}/{connector}", scope.id)
            }
            Step::InFrom { scope, sub, endpoint, .. } => {
                format!("in/{}/{sub}/{endpoint}", scope.id)
            }
            Step::InFromConnector { scope, connector, .. } => {
                format!("inc/{}/{connector}", scope.id)
            }
            Step::IntoIn { scope, published, .. } => {
                format!("downin/{}/{published}", scope.id)
            }
            Step::IntoOut { scope, published, .. } => {
                format!("downout/{}/{published}", scope.id)
            }
        }
    }
}

/// Resolves which collections an endpoint or connector side must
/// connect to.
pub struct AdjacencyResolver {
    ds: Datastore,
}

impl AdjacencyResolver {
    pub fn new(ds: Datastore) -> Self {
        Self { ds }
    }

    /// Find every adjacent collection of `selector` within `parent`.
    pub async fn find_adjacents(
        &self,
        parent: &Instance,
        selector: &EndpointSelector,
    ) -> Result<Vec<Adjacent>> {
        let composite = composite_of(parent)?;

        let mut queue: VecDeque<Step> = VecDeque::new();
        match &selector.slot {
            SlotName::Subcomponent(sub) => {
                let endpoint = selector.endpoint.clone().ok_or_else(|| {
                    TopologyError::Internal(format!(
                        "adjacency search on subcomponent {sub:?} requires an endpoint"
                    ))
                })?;
                let step = match selector.direction {
                    Direction::Out => Step::OutFrom {
                        scope: parent.clone(),
                        sub: sub.clone(),
                        endpoint: endpoint.clone(),
                        local: endpoint,
                    },
                    Direction::In => Step::InFrom {
                        scope: parent.clone(),
                        sub: sub.clone(),
                        endpoint: endpoint.clone(),
                        local: endpoint,
                    },
                };
                queue.push_back(step);
            }
            SlotName::Connector(name) => {
                let connector = composite.connectors.get(name).ok_or_else(|| {
                    TopologyError::NotFound(format!("connector {name:?} in {}", parent.id))
                })?;
                let ConnectorKind::Native(type_name) = &connector.kind else {
                    // Link connectors have no collection and no
                    // adjacency of their own.
                    return Ok(Vec::new());
                };
                let backing = native_model(composite, type_name)?;
                let local = native_endpoint(backing, selector.direction).ok_or_else(|| {
                    TopologyError::Internal(format!(
                        "connector type {type_name:?} lacks a {:?} endpoint",
                        selector.direction
                    ))
                })?;
                let step = match selector.direction {
                    Direction::Out => Step::OutFromConnector {
                        scope: parent.clone(),
                        connector: name.clone(),
                        local,
                    },
                    Direction::In => Step::InFromConnector {
                        scope: parent.clone(),
                        connector: name.clone(),
                        local,
                    },
                };
                queue.push_back(step);
            }
        }

        let mut adjacents = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();

        while let Some(step) = queue.pop_front() {
            if !visited.insert(step.visit_key()) {
                continue;
            }
            self.process(step, &mut queue, &mut adjacents).await?;
        }
        Ok(adjacents)
    }

    async fn process(
        &self,
        step: Step,
        queue: &mut VecDeque<Step>,
        adjacents: &mut Vec<Adjacent>,
    ) -> Result<()> {
        match step {
            Step::OutFrom { scope, sub, endpoint, local } => {
                let composite = composite_of(&scope)?;
                let reference = EndpointRef::new(&sub, &endpoint);

                for (name, connector) in &composite.connectors {
                    if !connector.inputs.contains(&reference) {
                        continue;
                    }
                    match &connector.kind {
                        ConnectorKind::Link => {
                            let target = link_output(name, connector)?;
                            self.toward_in_endpoint(&scope, target, &local, queue, adjacents)
                                .await?;
                        }
                        ConnectorKind::Native(type_name) => {
                            let backing = native_model(composite, type_name)?;
                            let remote =
                                native_endpoint(backing, Direction::In).ok_or_else(|| {
                                    TopologyError::Internal(format!(
                                        "connector type {type_name:?} lacks an in endpoint"
                                    ))
                                })?;
                            self.emit(&scope, SlotName::Connector(name.clone()), &local, &remote, adjacents)
                                .await?;
                        }
                    }
                }

                // Upward: the endpoint may also be published on the
                // enclosing composite.
                for (published, endpoint_spec) in &composite.endpoints {
                    let PublishedEndpoint::Out { mappings, .. } = endpoint_spec else {
                        continue;
                    };
                    if !mappings.contains(&reference) {
                        continue;
                    }
                    if let Some(step) = self.step_up(&scope, published, &local, Direction::Out).await? {
                        queue.push_back(step);
                    }
                }
            }

            Step::OutFromConnector { scope, connector, local } => {
                let composite = composite_of(&scope)?;
                let spec = connector_spec(composite, &connector)?;
                for output in spec.outputs.clone() {
                    self.toward_in_endpoint(&scope, output, &local, queue, adjacents)
                        .await?;
                }
            }

            Step::InFrom { scope, sub, endpoint, local } => {
                let composite = composite_of(&scope)?;
                let reference = EndpointRef::new(&sub, &endpoint);

                for (name, connector) in &composite.connectors {
                    if !connector.outputs.contains(&reference) {
                        continue;
                    }
                    match &connector.kind {
                        ConnectorKind::Link => {
                            match connector.inputs.first() {
                                Some(input) => {
                                    self.toward_out_endpoint(&scope, input.clone(), &local, queue, adjacents)
                                        .await?;
                                }
                                None => {
                                    // Entry connector: producers live one
                                    // level up, through the published
                                    // in-endpoint targeting it.
                                    self.up_through_entry(&scope, name, &local, queue).await?;
                                }
                            }
                        }
                        ConnectorKind::Native(type_name) => {
                            let backing = native_model(composite, type_name)?;
                            let remote =
                                native_endpoint(backing, Direction::Out).ok_or_else(|| {
                                    TopologyError::Internal(format!(
                                        "connector type {type_name:?} lacks an out endpoint"
                                    ))
                                })?;
                            self.emit(&scope, SlotName::Connector(name.clone()), &local, &remote, adjacents)
                                .await?;
                        }
                    }
                }
            }

            Step::InFromConnector { scope, connector, local } => {
                let composite = composite_of(&scope)?;
                let spec = connector_spec(composite, &connector)?;
                if spec.inputs.is_empty() {
                    self.up_through_entry(&scope, &connector, &local, queue).await?;
                } else {
                    for input in spec.inputs.clone() {
                        self.toward_out_endpoint(&scope, input, &local, queue, adjacents)
                            .await?;
                    }
                }
            }

            Step::IntoIn { scope, published, local } => {
                let composite = composite_of(&scope)?;
                let Some(PublishedEndpoint::In { connector, .. }) =
                    composite.endpoints.get(&published)
                else {
                    return Err(TopologyError::Internal(format!(
                        "published in-endpoint {published:?} missing on {}",
                        scope.id
                    )));
                };
                let spec = connector_spec(composite, connector)?;
                match &spec.kind {
                    ConnectorKind::Native(type_name) => {
                        let backing = native_model(composite, type_name)?;
                        let remote = native_endpoint(backing, Direction::In).ok_or_else(|| {
                            TopologyError::Internal(format!(
                                "connector type {type_name:?} lacks an in endpoint"
                            ))
                        })?;
                        self.emit(&scope, SlotName::Connector(connector.clone()), &local, &remote, adjacents)
                            .await?;
                    }
                    ConnectorKind::Link => {
                        let target = link_output(connector, spec)?;
                        self.toward_in_endpoint(&scope, target, &local, queue, adjacents)
                            .await?;
                    }
                }
            }

            Step::IntoOut { scope, published, local } => {
                let composite = composite_of(&scope)?;
                let Some(PublishedEndpoint::Out { mappings, .. }) =
                    composite.endpoints.get(&published)
                else {
                    return Err(TopologyError::Internal(format!(
                        "published out-endpoint {published:?} missing on {}",
                        scope.id
                    )));
                };
                for mapping in mappings.clone() {
                    self.toward_out_endpoint(&scope, mapping, &local, queue, adjacents)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Walk toward the in-endpoint `target` within `scope`: a basic
    /// target is an adjacent, a composite target descends.
    async fn toward_in_endpoint(
        &self,
        scope: &Instance,
        target: EndpointRef,
        local: &str,
        queue: &mut VecDeque<Step>,
        adjacents: &mut Vec<Adjacent>,
    ) -> Result<()> {
        let composite = composite_of(scope)?;
        match slot_model(composite, &target.subcomponent)? {
            Model::Basic(_) => {
                self.emit(
                    scope,
                    SlotName::Subcomponent(target.subcomponent.clone()),
                    local,
                    &target.endpoint,
                    adjacents,
                )
                .await?;
            }
            Model::Composite(_) => {
                for child in self.children(scope, &target.subcomponent).await? {
                    queue.push_back(Step::IntoIn {
                        scope: child,
                        published: target.endpoint.clone(),
                        local: local.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Walk toward the out-endpoint `source` within `scope` (mirror of
    /// [`Self::toward_in_endpoint`]).
    async fn toward_out_endpoint(
        &self,
        scope: &Instance,
        source: EndpointRef,
        local: &str,
        queue: &mut VecDeque<Step>,
        adjacents: &mut Vec<Adjacent>,
    ) -> Result<()> {
        let composite = composite_of(scope)?;
        match slot_model(composite, &source.subcomponent)? {
            Model::Basic(_) => {
                self.emit(
                    scope,
                    SlotName::Subcomponent(source.subcomponent.clone()),
                    local,
                    &source.endpoint,
                    adjacents,
                )
                .await?;
            }
            Model::Composite(_) => {
                for child in self.children(scope, &source.subcomponent).await? {
                    queue.push_back(Step::IntoOut {
                        scope: child,
                        published: source.endpoint.clone(),
                        local: local.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Recurse one level up through a published out-endpoint. The local
    /// endpoint name is preserved so results match the local viewpoint.
    async fn step_up(
        &self,
        scope: &Instance,
        published: &str,
        local: &str,
        direction: Direction,
    ) -> Result<Option<Step>> {
        let (Some(parent_id), Some(SlotName::Subcomponent(slot))) = (&scope.parent, &scope.slot)
        else {
            return Ok(None);
        };
        let Some(parent) = self.ds.get::<Instance>(&parent_id.to_string()).await? else {
            tracing::warn!(parent = %parent_id, "enclosing instance missing, skipping upward hop");
            return Ok(None);
        };
        Ok(Some(match direction {
            Direction::Out => Step::OutFrom {
                scope: parent,
                sub: slot.clone(),
                endpoint: published.to_string(),
                local: local.to_string(),
            },
            Direction::In => Step::InFrom {
                scope: parent,
                sub: slot.clone(),
                endpoint: published.to_string(),
                local: local.to_string(),
            },
        }))
    }

    /// Upward hop for an entry connector: producers are whatever feeds
    /// the published in-endpoint targeting `connector` one level up.
    async fn up_through_entry(
        &self,
        scope: &Instance,
        connector: &str,
        local: &str,
        queue: &mut VecDeque<Step>,
    ) -> Result<()> {
        let composite = composite_of(scope)?;
        for (published, endpoint_spec) in &composite.endpoints {
            let PublishedEndpoint::In { connector: target, .. } = endpoint_spec else {
                continue;
            };
            if target != connector {
                continue;
            }
            if let Some(step) = self.step_up(scope, published, local, Direction::In).await? {
                queue.push_back(step);
            }
        }
        Ok(())
    }

    /// Record an adjacent, resolving the collection backing
    /// `(scope, slot)`.
    async fn emit(
        &self,
        scope: &Instance,
        slot: SlotName,
        local: &str,
        remote: &str,
        adjacents: &mut Vec<Adjacent>,
    ) -> Result<()> {
        let collection = self
            .ds
            .find_one::<trellis_types::Collection>(
                &Query::all()
                    .eq("parent", scope.id.to_string())
                    .eq("name", &slot),
            )
            .await?;
        match collection {
            Some(collection) => adjacents.push(Adjacent {
                collection: collection.id,
                local_name: local.to_string(),
                remote_name: remote.to_string(),
            }),
            None => {
                // Transient absence self-heals on the next pass.
                tracing::warn!(parent = %scope.id, slot = %slot, "adjacent collection not yet built");
            }
        }
        Ok(())
    }

    async fn children(&self, scope: &Instance, sub: &str) -> Result<Vec<Instance>> {
        Ok(self
            .ds
            .find(
                &Query::all()
                    .eq("parent", scope.id.to_string())
                    .eq("slot", &SlotName::Subcomponent(sub.to_string()))
                    .field(
                        "state",
                        Predicate::In(vec![
                            serde_json::json!(InstanceState::Init),
                            serde_json::json!(InstanceState::Ready),
                        ]),
                    ),
                SearchOptions::default(),
            )
            .await?)
    }
}

fn composite_of(instance: &Instance) -> Result<&CompositeModel> {
    instance
        .model
        .as_ref()
        .and_then(Model::as_composite)
        .ok_or_else(|| {
            TopologyError::Internal(format!(
                "instance {} has no resolved composite model",
                instance.id
            ))
        })
}

fn slot_model<'m>(composite: &'m CompositeModel, sub: &str) -> Result<&'m Model> {
    composite
        .subcomponent_model(sub)
        .ok_or_else(|| TopologyError::NotFound(format!("subcomponent {sub:?}")))
}

fn connector_spec<'m>(composite: &'m CompositeModel, name: &str) -> Result<&'m Connector> {
    composite
        .connectors
        .get(name)
        .ok_or_else(|| TopologyError::NotFound(format!("connector {name:?}")))
}

fn native_model<'m>(composite: &'m CompositeModel, type_name: &str) -> Result<&'m BasicModel> {
    composite
        .imports
        .get(type_name)
        .and_then(Model::as_basic)
        .ok_or_else(|| {
            TopologyError::Internal(format!("connector type {type_name:?} is not a basic import"))
        })
}

fn native_endpoint(backing: &BasicModel, direction: Direction) -> Option<String> {
    backing
        .endpoints
        .iter()
        .find(|(_, endpoint)| endpoint.direction == direction)
        .map(|(name, _)| name.clone())
}

fn link_output<'m>(name: &str, connector: &'m Connector) -> Result<EndpointRef> {
    connector
        .outputs
        .first()
        .cloned()
        .ok_or_else(|| TopologyError::Internal(format!("Link connector {name:?} has no output")))
}
