//! Tree construction and two-phase destruction.
//!
//! Building is split in two passes. `build` creates the instance tree
//! and its empty collections: one composite instance per composite
//! model, one `preinit` collection per basic subcomponent and per
//! native connector, recursing into nested composites as many times as
//! the scheduler asks for. `populate` then runs the scheduler over
//! every collection and applies the resulting add events, so members
//! only appear after the whole skeleton (and its links) exists.
//!
//! Destruction never deletes rows: `mark_destroy` flags the subtree's
//! instances, collections and incident links as `destroy` and leaves
//! the reaping to the projection daemon.

use crate::error::{Result, TopologyError};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use std::sync::Arc;
use trellis_scheduler::Scheduler;
use trellis_store::{
    CollectionGuard, Datastore, Predicate, Query, RetryPolicy, SearchOptions, UpdateOptions,
};
use trellis_types::{
    Collection, CollectionState, ConnectorKind, Instance, InstanceId, InstanceState, Link, Model,
    SchedulingEvent, SchedulingEventKind, SlotName,
};

/// The persisted skeleton produced by one `build` call.
#[derive(Debug)]
pub struct BuiltTree {
    /// Root composite instance of the built subtree.
    pub root: Instance,

    /// Every collection created anywhere in the subtree, flattened.
    pub collections: Vec<Collection>,
}

/// Builds, populates and marks down instance trees.
pub struct TreeBuilder {
    ds: Datastore,
    scheduler: Arc<Scheduler>,
    retry: RetryPolicy,
}

impl TreeBuilder {
    pub fn new(ds: Datastore, scheduler: Arc<Scheduler>, retry: RetryPolicy) -> Self {
        Self { ds, scheduler, retry }
    }

    /// Build the skeleton for `model` under `parent`/`slot` (both
    /// `None` for a root tree). Collections are created empty.
    pub async fn build(
        &self,
        parent: Option<&Instance>,
        slot: Option<SlotName>,
        model: &Model,
    ) -> Result<BuiltTree> {
        if !model.is_composite() {
            return Err(TopologyError::RootNotComposite);
        }
        self.build_composite(parent.map(|p| p.id.clone()), slot, model.clone())
            .await
    }

    fn build_composite(
        &self,
        parent: Option<InstanceId>,
        slot: Option<SlotName>,
        model: Model,
    ) -> BoxFuture<'_, Result<BuiltTree>> {
        async move {
            let root = Instance::composite(parent, slot, model);
            self.ds.put(&root).await?;

            let composite = root
                .model
                .as_ref()
                .and_then(Model::as_composite)
                .ok_or(TopologyError::RootNotComposite)?;

            let mut collections = Vec::new();

            for (name, sub) in &composite.subcomponents {
                let slot = SlotName::Subcomponent(name.clone());
                let backing = composite
                    .imports
                    .get(&sub.type_name)
                    .ok_or_else(|| TopologyError::NotFound(format!("import {:?}", sub.type_name)))?;
                match backing {
                    Model::Basic(basic) => {
                        let domains = if sub.domains.is_empty() {
                            composite.domains.clone()
                        } else {
                            sub.domains.clone()
                        };
                        let collection =
                            Collection::for_slot(root.id.clone(), slot, basic, domains);
                        self.ds.put(&collection).await?;
                        collections.push(collection);
                    }
                    Model::Composite(_) => {
                        let events = self.scheduler.schedule(&root, &slot, None).await?;
                        for event in events {
                            if event.kind != SchedulingEventKind::InstanceAdd {
                                continue;
                            }
                            let child = self
                                .build_composite(
                                    Some(root.id.clone()),
                                    Some(slot.clone()),
                                    backing.clone(),
                                )
                                .await?;
                            collections.extend(child.collections);
                        }
                    }
                }
            }

            for (name, connector) in &composite.connectors {
                let ConnectorKind::Native(type_name) = &connector.kind else {
                    continue;
                };
                let backing = composite
                    .imports
                    .get(type_name)
                    .and_then(Model::as_basic)
                    .ok_or_else(|| {
                        TopologyError::Internal(format!(
                            "connector type {type_name:?} is not a basic import"
                        ))
                    })?;
                let collection = Collection::for_slot(
                    root.id.clone(),
                    SlotName::Connector(name.clone()),
                    backing,
                    composite.domains.clone(),
                );
                self.ds.put(&collection).await?;
                collections.push(collection);
            }

            tracing::debug!(
                root = %root.id,
                collections = collections.len(),
                "built composite skeleton"
            );
            Ok(BuiltTree { root, collections })
        }
        .boxed()
    }

    /// Run the scheduler over every collection of `tree` and apply the
    /// resulting events.
    pub async fn populate(&self, tree: &BuiltTree) -> Result<()> {
        for collection in &tree.collections {
            let parent = self
                .ds
                .require::<Instance>(&collection.parent.to_string())
                .await?;
            let events = self.scheduler.schedule(&parent, &collection.name, None).await?;
            for event in &events {
                self.apply(event).await?;
            }
        }
        Ok(())
    }

    /// Apply one scheduling event against a basic collection: adds
    /// create a member instance and enroll it under the collection
    /// lock, removes flag the victim for destruction.
    pub async fn apply(&self, event: &SchedulingEvent) -> Result<()> {
        match event.kind {
            SchedulingEventKind::InstanceAdd => {
                let collection = self
                    .ds
                    .find_one::<Collection>(
                        &Query::all()
                            .eq("parent", event.parent.to_string())
                            .eq("name", &event.slot),
                    )
                    .await?
                    .ok_or_else(|| {
                        TopologyError::NotFound(format!(
                            "collection {}/{}",
                            event.parent, event.slot
                        ))
                    })?;

                let member = Instance::basic(
                    event.parent.clone(),
                    event.slot.clone(),
                    collection.id.clone(),
                    event.domain.clone(),
                );
                self.ds.put(&member).await?;

                let mut guard =
                    CollectionGuard::acquire(&self.ds, &collection.id, &self.retry).await?;
                guard.add_member(member.id.clone());
                if guard.collection.state == CollectionState::Preinit {
                    guard.collection.state = CollectionState::Init;
                }
                guard.commit().await?;
            }
            SchedulingEventKind::InstanceRemove => {
                let victim = event.instance.as_ref().ok_or_else(|| {
                    TopologyError::Internal("remove event without a victim".into())
                })?;
                self.ds
                    .patch_id::<Instance>(
                        &victim.to_string(),
                        json!({"state": InstanceState::Destroy}),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Flag the whole subtree rooted at `root` for destruction:
    /// instances, collections, and every link touching one of the
    /// subtree's collections.
    pub async fn mark_destroy(&self, root: &InstanceId) -> Result<()> {
        let mut instance_ids = vec![root.clone()];
        let mut frontier = vec![root.clone()];
        while let Some(current) = frontier.pop() {
            let children: Vec<Instance> = self
                .ds
                .find(
                    &Query::all().eq("parent", current.to_string()),
                    SearchOptions::default(),
                )
                .await?;
            for child in children {
                frontier.push(child.id.clone());
                instance_ids.push(child.id);
            }
        }

        let id_values: Vec<serde_json::Value> =
            instance_ids.iter().map(|id| json!(id)).collect();

        let collections: Vec<Collection> = self
            .ds
            .find(
                &Query::all().field("parent", Predicate::In(id_values.clone())),
                SearchOptions::default(),
            )
            .await?;
        let collection_values: Vec<serde_json::Value> =
            collections.iter().map(|c| json!(c.id)).collect();

        self.ds
            .patch::<Instance>(
                &Query::all().field("id", Predicate::In(id_values)),
                json!({"state": InstanceState::Destroy}),
                UpdateOptions::default(),
            )
            .await?;
        self.ds
            .patch::<Collection>(
                &Query::all().field("id", Predicate::In(collection_values.clone())),
                json!({"state": CollectionState::Destroy}),
                UpdateOptions::default(),
            )
            .await?;
        for side in ["src", "dst"] {
            self.ds
                .patch::<Link>(
                    &Query::all().field(side, Predicate::In(collection_values.clone())),
                    json!({"state": trellis_types::LinkState::Destroy}),
                    UpdateOptions::default(),
                )
                .await?;
        }

        tracing::info!(
            root = %root,
            instances = instance_ids.len(),
            collections = collections.len(),
            "marked subtree for destruction"
        );
        Ok(())
    }
}
