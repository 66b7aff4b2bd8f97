//! Link materialization.
//!
//! Walks every collection of a built tree, asks the adjacency resolver
//! for both sides of each endpoint, and records one `Link` row per
//! distinct `(src, src_name, dst, dst_name)` tuple. Both sides of each
//! eventual link run the search, so the same tuple surfaces twice;
//! deduplication against the in-flight batch and the store keeps
//! `connect` idempotent.

use crate::adjacency::{Adjacent, AdjacencyResolver, EndpointSelector};
use crate::builder::BuiltTree;
use crate::error::{Result, TopologyError};
use std::collections::HashSet;
use trellis_store::{Datastore, Query};
use trellis_types::{Collection, Direction, Instance, Link, SlotName};

/// Materializes link rows for a built tree.
pub struct TreeConnector {
    ds: Datastore,
    adjacency: AdjacencyResolver,
}

impl TreeConnector {
    pub fn new(ds: Datastore) -> Self {
        let adjacency = AdjacencyResolver::new(ds.clone());
        Self { ds, adjacency }
    }

    /// Resolve and persist every link incident to the tree's
    /// collections, returning the links newly created by this call.
    pub async fn connect(&self, tree: &BuiltTree) -> Result<Vec<Link>> {
        let mut created = Vec::new();
        let mut seen: HashSet<(String, String, String, String)> = HashSet::new();

        for collection in &tree.collections {
            let parent = self
                .ds
                .require::<Instance>(&collection.parent.to_string())
                .await?;

            match &collection.name {
                SlotName::Subcomponent(_) => {
                    for (endpoint, protocol) in &collection.outputs {
                        let adjacents = self
                            .adjacency
                            .find_adjacents(
                                &parent,
                                &EndpointSelector {
                                    slot: collection.name.clone(),
                                    endpoint: Some(endpoint.clone()),
                                    direction: Direction::Out,
                                },
                            )
                            .await?;
                        for adjacent in adjacents {
                            self.record(collection, Direction::Out, protocol, &adjacent, &mut seen, &mut created)
                                .await?;
                        }
                    }
                    for (endpoint, protocol) in &collection.inputs {
                        let adjacents = self
                            .adjacency
                            .find_adjacents(
                                &parent,
                                &EndpointSelector {
                                    slot: collection.name.clone(),
                                    endpoint: Some(endpoint.clone()),
                                    direction: Direction::In,
                                },
                            )
                            .await?;
                        for adjacent in adjacents {
                            self.record(collection, Direction::In, protocol, &adjacent, &mut seen, &mut created)
                                .await?;
                        }
                    }
                }
                SlotName::Connector(_) => {
                    for direction in [Direction::Out, Direction::In] {
                        let adjacents = self
                            .adjacency
                            .find_adjacents(
                                &parent,
                                &EndpointSelector {
                                    slot: collection.name.clone(),
                                    endpoint: None,
                                    direction,
                                },
                            )
                            .await?;
                        for adjacent in adjacents {
                            let protocol = match direction {
                                Direction::Out => collection.outputs.get(&adjacent.local_name),
                                Direction::In => collection.inputs.get(&adjacent.local_name),
                            }
                            .ok_or_else(|| {
                                TopologyError::Internal(format!(
                                    "connector collection {} lacks endpoint {:?}",
                                    collection.id, adjacent.local_name
                                ))
                            })?
                            .clone();
                            self.record(collection, direction, &protocol, &adjacent, &mut seen, &mut created)
                                .await?;
                        }
                    }
                }
            }
        }

        tracing::debug!(root = %tree.root.id, links = created.len(), "connected tree");
        Ok(created)
    }

    async fn record(
        &self,
        collection: &Collection,
        direction: Direction,
        protocol: &str,
        adjacent: &Adjacent,
        seen: &mut HashSet<(String, String, String, String)>,
        created: &mut Vec<Link>,
    ) -> Result<()> {
        if adjacent.local_name.is_empty() || adjacent.remote_name.is_empty() {
            return Err(TopologyError::Internal(format!(
                "empty endpoint name on link at collection {}",
                collection.id
            )));
        }

        let link = match direction {
            Direction::Out => Link::new(
                protocol,
                collection.id.clone(),
                adjacent.local_name.clone(),
                adjacent.collection.clone(),
                adjacent.remote_name.clone(),
            ),
            Direction::In => Link::new(
                protocol,
                adjacent.collection.clone(),
                adjacent.remote_name.clone(),
                collection.id.clone(),
                adjacent.local_name.clone(),
            ),
        };

        let key = (
            link.src.to_string(),
            link.src_name.clone(),
            link.dst.to_string(),
            link.dst_name.clone(),
        );
        if !seen.insert(key) {
            return Ok(());
        }

        let existing = self
            .ds
            .find_one::<Link>(
                &Query::all()
                    .eq("src", link.src.to_string())
                    .eq("src_name", &link.src_name)
                    .eq("dst", link.dst.to_string())
                    .eq("dst_name", &link.dst_name),
            )
            .await?;
        if existing.is_some() {
            return Ok(());
        }

        self.ds.put(&link).await?;
        created.push(link);
        Ok(())
    }
}
