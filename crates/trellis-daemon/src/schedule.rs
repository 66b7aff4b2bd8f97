//! The schedule daemon.
//!
//! Periodically re-runs the scheduler over every recently touched
//! composite instance and applies the resulting events: basic events
//! enroll or flag member instances, composite adds build whole
//! subtrees, composite removes flag them for destruction.
//!
//! Within one pass instances are processed children first, so a scale
//! decision inside a nested composite lands before its parent reacts
//! to the changed shape. The trailing recency window bounds each pass
//! to trees something recently happened to; converged old trees cost
//! nothing.

use crate::config::ScheduleConfig;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::interval;
use trellis_scheduler::Scheduler;
use trellis_store::{Datastore, Predicate, Query, SearchOptions};
use trellis_topology::{TreeBuilder, TreeConnector};
use trellis_types::{
    ConnectorKind, Instance, InstanceId, InstanceKind, InstanceState, Model, SchedulingEvent,
    SchedulingEventKind, SlotName,
};

/// Periodic scaling reconciliation.
pub struct ScheduleDaemon {
    config: ScheduleConfig,
    ds: Datastore,
    scheduler: Arc<Scheduler>,
    builder: Arc<TreeBuilder>,
    connector: Arc<TreeConnector>,
    running: Arc<RwLock<bool>>,
}

impl ScheduleDaemon {
    pub fn new(
        config: ScheduleConfig,
        ds: Datastore,
        scheduler: Arc<Scheduler>,
        builder: Arc<TreeBuilder>,
        connector: Arc<TreeConnector>,
    ) -> Self {
        Self {
            config,
            ds,
            scheduler,
            builder,
            connector,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Run the reconciliation loop until [`ScheduleDaemon::stop`].
    pub async fn start(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }
        tracing::info!(interval_secs = self.config.interval_secs, "schedule daemon started");

        let mut ticker = interval(self.config.interval());
        loop {
            ticker.tick().await;
            if !*self.running.read().await {
                break;
            }
            if let Err(err) = self.pass().await {
                tracing::error!(error = %err, "schedule pass failed");
            }
        }
        tracing::info!("schedule daemon stopped");
    }

    /// Stop after the in-flight pass finishes.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// One full reconciliation pass.
    pub async fn pass(&self) -> Result<()> {
        let cutoff = chrono::Utc::now() - self.config.window();
        let recent: Vec<Instance> = self
            .ds
            .find(
                &Query::all()
                    .eq("kind", InstanceKind::Composite)
                    .field(
                        "state",
                        Predicate::In(vec![
                            serde_json::json!(InstanceState::Init),
                            serde_json::json!(InstanceState::Ready),
                        ]),
                    )
                    .field("last", Predicate::Gte(serde_json::json!(cutoff))),
                SearchOptions::default(),
            )
            .await?;

        let ordered = children_first(recent);
        tracing::debug!(instances = ordered.len(), "schedule pass");

        for instance in &ordered {
            if let Err(err) = self.reconcile_instance(instance).await {
                tracing::error!(instance = %instance.id, error = %err, "failed to reconcile instance");
            }
            // Every processed composite gets its `last` bumped so the
            // next trailing-window query still sees the tree.
            self.ds
                .patch_id::<Instance>(&instance.id.to_string(), serde_json::json!({}))
                .await?;
        }
        Ok(())
    }

    async fn reconcile_instance(&self, instance: &Instance) -> Result<()> {
        let Some(composite) = instance.model.as_ref().and_then(Model::as_composite) else {
            return Ok(());
        };

        for name in composite.subcomponents.keys() {
            let slot = SlotName::Subcomponent(name.clone());
            let child_is_composite = composite
                .subcomponent_model(name)
                .map(Model::is_composite)
                .unwrap_or(false);
            let events = self.scheduler.schedule(instance, &slot, None).await?;
            for event in &events {
                if child_is_composite {
                    self.apply_composite(instance, event).await?;
                } else {
                    self.builder.apply(event).await?;
                }
            }
        }

        for (name, connector) in &composite.connectors {
            if connector.kind == ConnectorKind::Link {
                continue;
            }
            let slot = SlotName::Connector(name.clone());
            let events = self.scheduler.schedule(instance, &slot, None).await?;
            for event in &events {
                self.builder.apply(event).await?;
            }
        }
        Ok(())
    }

    /// Apply one event on a composite slot: adds build, connect and
    /// populate a whole subtree, removes flag one for destruction.
    async fn apply_composite(&self, parent: &Instance, event: &SchedulingEvent) -> Result<()> {
        match event.kind {
            SchedulingEventKind::InstanceAdd => {
                let composite = parent
                    .model
                    .as_ref()
                    .and_then(Model::as_composite)
                    .ok_or_else(|| {
                        trellis_topology::TopologyError::Internal(format!(
                            "composite event against modelless instance {}",
                            parent.id
                        ))
                    })?;
                let model = composite
                    .subcomponent_model(event.slot.name())
                    .ok_or_else(|| {
                        trellis_topology::TopologyError::NotFound(format!(
                            "model for slot {}",
                            event.slot
                        ))
                    })?
                    .clone();
                let tree = self
                    .builder
                    .build(Some(parent), Some(event.slot.clone()), &model)
                    .await?;
                self.connector.connect(&tree).await?;
                self.builder.populate(&tree).await?;
                tracing::info!(parent = %parent.id, slot = %event.slot, root = %tree.root.id, "added composite subtree");
            }
            SchedulingEventKind::InstanceRemove => {
                if let Some(victim) = &event.instance {
                    self.builder.mark_destroy(victim).await?;
                    tracing::info!(parent = %parent.id, slot = %event.slot, victim = %victim, "removing composite subtree");
                }
            }
        }
        Ok(())
    }
}

/// Order instances so every instance precedes its ancestors. Depth is
/// computed against the fetched set only; a parent outside the window
/// simply ends the chain.
pub(crate) fn children_first(instances: Vec<Instance>) -> Vec<Instance> {
    let parents: HashMap<InstanceId, Option<InstanceId>> = instances
        .iter()
        .map(|i| (i.id.clone(), i.parent.clone()))
        .collect();

    let depth = |instance: &Instance| {
        let mut depth = 0usize;
        let mut current = instance.parent.clone();
        while let Some(parent) = current {
            if depth > parents.len() {
                break;
            }
            match parents.get(&parent) {
                Some(next) => {
                    depth += 1;
                    current = next.clone();
                }
                None => break,
            }
        }
        depth
    };

    let mut ordered: Vec<(usize, Instance)> =
        instances.into_iter().map(|i| (depth(&i), i)).collect();
    ordered.sort_by(|a, b| b.0.cmp(&a.0));
    ordered.into_iter().map(|(_, i)| i).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use trellis_store::{MemoryStore, RetryPolicy};
    use trellis_types::{
        BasicModel, Collection, CompositeModel, Domain, DomainState, Durability, Endpoint,
        EndpointRef, Subcomponent,
    };

    fn basic(endpoints: &[(&str, trellis_types::Direction, &str)]) -> Model {
        let endpoints = endpoints
            .iter()
            .map(|(name, direction, protocol)| {
                (
                    name.to_string(),
                    Endpoint {
                        direction: *direction,
                        protocol: protocol.to_string(),
                    },
                )
            })
            .collect();
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

    fn sub(type_name: &str) -> Subcomponent {
        Subcomponent {
            type_name: type_name.into(),
            cardinality: Default::default(),
            durability: Durability::Ephemeral,
            domains: Vec::new(),
            variables: BTreeMap::new(),
            schedule: None,
        }
    }

    fn producer_consumer() -> Model {
        use trellis_types::{Connector, Direction};
        Model::Composite(CompositeModel {
            imports: [
                ("P".to_string(), basic(&[("e", Direction::Out, "tcp:80")])),
                ("C".to_string(), basic(&[("f", Direction::In, "tcp:80")])),
            ]
            .into_iter()
            .collect(),
            subcomponents: [("p".to_string(), sub("P")), ("c".to_string(), sub("C"))]
                .into_iter()
                .collect(),
            connectors: [(
                "wire".to_string(),
                Connector {
                    kind: ConnectorKind::Link,
                    outputs: vec![EndpointRef::new("c", "f")],
                    inputs: vec![EndpointRef::new("p", "e")],
                    entrypoints: BTreeMap::new(),
                },
            )]
            .into_iter()
            .collect(),
            endpoints: BTreeMap::new(),
            variables: BTreeMap::new(),
            domains: Vec::new(),
        })
    }

    fn daemon(ds: &Datastore) -> ScheduleDaemon {
        let scheduler = Arc::new(Scheduler::new(ds.clone()));
        let builder = Arc::new(TreeBuilder::new(
            ds.clone(),
            scheduler.clone(),
            RetryPolicy::fast(),
        ));
        let connector = Arc::new(TreeConnector::new(ds.clone()));
        ScheduleDaemon::new(
            ScheduleConfig::default(),
            ds.clone(),
            scheduler,
            builder,
            connector,
        )
    }

    async fn seed_domain(ds: &Datastore) {
        let mut domain = Domain::new("alpha", "simulated", vec!["docker".into()]);
        domain.state = DomainState::Ready;
        ds.put(&domain).await.unwrap();
    }

    #[test]
    fn children_precede_ancestors() {
        let root = Instance::composite(None, None, producer_consumer());
        let child = Instance::composite(
            Some(root.id.clone()),
            Some(SlotName::Subcomponent("s".into())),
            producer_consumer(),
        );
        let grandchild = Instance::composite(
            Some(child.id.clone()),
            Some(SlotName::Subcomponent("s".into())),
            producer_consumer(),
        );

        let ordered = children_first(vec![root.clone(), grandchild.clone(), child.clone()]);
        assert_eq!(ordered[0].id, grandchild.id);
        assert_eq!(ordered[1].id, child.id);
        assert_eq!(ordered[2].id, root.id);
    }

    #[tokio::test]
    async fn pass_tops_up_every_collection() {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        seed_domain(&ds).await;
        let daemon = daemon(&ds);

        // Skeleton without members, as if populate never ran.
        let tree = daemon
            .builder
            .build(None, None, &producer_consumer())
            .await
            .unwrap();
        daemon.connector.connect(&tree).await.unwrap();

        daemon.pass().await.unwrap();

        for collection in &tree.collections {
            let reloaded: Collection =
                ds.require(&collection.id.to_string()).await.unwrap();
            assert_eq!(reloaded.members.len(), 2);
        }
    }

    #[tokio::test]
    async fn pass_bumps_last_of_processed_composites() {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        seed_domain(&ds).await;
        let daemon = daemon(&ds);

        let tree = daemon
            .builder
            .build(None, None, &producer_consumer())
            .await
            .unwrap();
        daemon.connector.connect(&tree).await.unwrap();
        let before: Instance = ds.require(&tree.root.id.to_string()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        daemon.pass().await.unwrap();

        let after: Instance = ds.require(&tree.root.id.to_string()).await.unwrap();
        assert!(after.last > before.last);
    }

    #[tokio::test]
    async fn stale_instances_are_outside_the_window() {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        seed_domain(&ds).await;
        let daemon = daemon(&ds);

        let tree = daemon
            .builder
            .build(None, None, &producer_consumer())
            .await
            .unwrap();
        let stale = chrono::Utc::now() - chrono::Duration::hours(2);
        ds.patch_id::<Instance>(&tree.root.id.to_string(), json!({"last": stale}))
            .await
            .unwrap();

        daemon.pass().await.unwrap();

        for collection in &tree.collections {
            let reloaded: Collection =
                ds.require(&collection.id.to_string()).await.unwrap();
            assert!(reloaded.members.is_empty());
        }
    }

    #[tokio::test]
    async fn composite_slot_gets_its_singleton_subtree() {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        seed_domain(&ds).await;
        let daemon = daemon(&ds);

        let outer = Model::Composite(CompositeModel {
            imports: [("X".to_string(), producer_consumer())].into_iter().collect(),
            subcomponents: [("s".to_string(), sub("X"))].into_iter().collect(),
            connectors: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            variables: BTreeMap::new(),
            domains: Vec::new(),
        });
        let root = Instance::composite(None, None, outer);
        ds.put(&root).await.unwrap();

        daemon.pass().await.unwrap();

        let children: Vec<Instance> = ds
            .find(
                &Query::all()
                    .eq("parent", root.id.to_string())
                    .eq("slot", SlotName::Subcomponent("s".into())),
                SearchOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].kind, InstanceKind::Composite);

        // The subtree arrived built, connected and populated.
        let collections: Vec<Collection> = ds
            .find(
                &Query::all().eq("parent", children[0].id.to_string()),
                SearchOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(collections.len(), 2);
        assert!(collections.iter().all(|c| c.members.len() == 2));
    }
}
