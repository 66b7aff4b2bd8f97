//! The scheduling decision function.
//!
//! `schedule` is stateless: it reads store snapshots and emits events,
//! it never writes. The decision rules are evaluated in order and the
//! first matching rule wins:
//!
//! 1. below the cardinality floor: add up to `min`
//! 2. basic slot below the minimum-replica floor: top up to `min(2, max)`
//! 3. composite slot with zero floor and zero instances: add one
//!    (composites default to singleton)
//! 4. above the ceiling: remove one, uniformly random victim
//! 5. basic slot with metrics: CPU >= 80% adds one, CPU <= 30% removes
//!    one
//!
//! Victim selection is uniformly random with no affinity ordering,
//! kept intentionally simple.

use crate::error::{Result, SchedulerError};
use crate::placement::Placement;
use rand::seq::SliceRandom;
use trellis_store::{Datastore, Predicate, Query, SearchOptions};
use trellis_types::{
    Cardinality, Collection, ConnectorKind, Instance, InstanceState, Model, SchedulingEvent,
    SlotName,
};

/// Fixed minimum-replica floor for basic slots.
pub const MIN_REPLICAS: u32 = 2;

/// Average CPU utilization above which a basic slot scales up.
pub const SCALE_UP_CPU: f64 = 0.80;

/// Average CPU utilization below which a basic slot scales down.
pub const SCALE_DOWN_CPU: f64 = 0.30;

/// Stateless scaling decisions over store snapshots.
pub struct Scheduler {
    ds: Datastore,
}

impl Scheduler {
    pub fn new(ds: Datastore) -> Self {
        Self { ds }
    }

    /// Decide what should happen to one slot of one composite instance
    /// right now. An explicit `cardinality` overrides the resolved one.
    pub async fn schedule(
        &self,
        parent: &Instance,
        slot: &SlotName,
        cardinality: Option<Cardinality>,
    ) -> Result<Vec<SchedulingEvent>> {
        let composite = parent
            .model
            .as_ref()
            .and_then(Model::as_composite)
            .ok_or_else(|| SchedulerError::NotComposite(parent.id.clone()))?;

        let unknown = || SchedulerError::UnknownSlot {
            parent: parent.id.clone(),
            slot: slot.clone(),
        };

        let (slot_model, resolved_cardinality, allow) = match slot {
            SlotName::Subcomponent(name) => {
                let sub = composite.subcomponents.get(name).ok_or_else(unknown)?;
                let model = composite.imports.get(&sub.type_name).ok_or_else(unknown)?;
                let allow = if sub.domains.is_empty() {
                    composite.domains.clone()
                } else {
                    sub.domains.clone()
                };
                (model, sub.cardinality, allow)
            }
            SlotName::Connector(name) => {
                let connector = composite.connectors.get(name).ok_or_else(unknown)?;
                match &connector.kind {
                    // Link connectors are invisible at the collection
                    // level and never scheduled.
                    ConnectorKind::Link => return Ok(Vec::new()),
                    ConnectorKind::Native(_) => {}
                }
                let model = composite.connector_model(name).ok_or_else(unknown)?;
                (model, Cardinality::at_least(1), composite.domains.clone())
            }
        };

        match slot_model {
            Model::Basic(basic) => {
                self.schedule_basic(parent, slot, resolved_cardinality, cardinality, &basic.runtime, &allow)
                    .await
            }
            Model::Composite(_) => {
                self.schedule_composite(parent, slot, cardinality.unwrap_or(resolved_cardinality))
                    .await
            }
        }
    }

    async fn schedule_basic(
        &self,
        parent: &Instance,
        slot: &SlotName,
        resolved: Cardinality,
        explicit: Option<Cardinality>,
        runtime: &str,
        allow: &[String],
    ) -> Result<Vec<SchedulingEvent>> {
        let cardinality = explicit.unwrap_or(resolved);

        let collection: Option<Collection> = self
            .ds
            .find_one(
                &Query::all()
                    .eq("parent", parent.id.to_string())
                    .eq("name", slot),
            )
            .await?;

        let members: Vec<Instance> = match &collection {
            Some(collection) => {
                self.ds
                    .find(
                        &Query::all()
                            .eq("collection", collection.id.to_string())
                            .field("proxy_of", Predicate::Exists(false))
                            .field(
                                "state",
                                Predicate::In(vec![
                                    serde_json::json!(InstanceState::Init),
                                    serde_json::json!(InstanceState::Ready),
                                ]),
                            ),
                        SearchOptions::default(),
                    )
                    .await?
            }
            None => Vec::new(),
        };

        let count = members.len() as u32;
        let cpu = collection.as_ref().and_then(|c| c.cpu);

        let mut additions = 0;
        let mut removal = false;

        if count < cardinality.min {
            additions = cardinality.min - count;
        } else if count < MIN_REPLICAS && cardinality.max.map_or(true, |max| count < max) {
            let floor = cardinality.max.map_or(MIN_REPLICAS, |max| MIN_REPLICAS.min(max));
            additions = floor.saturating_sub(count);
        } else if cardinality.max.is_some_and(|max| count > max) {
            removal = true;
        } else if let Some(cpu) = cpu {
            if cpu >= SCALE_UP_CPU && cardinality.max.map_or(true, |max| count < max) {
                additions = 1;
            } else if cpu <= SCALE_DOWN_CPU && count > cardinality.min {
                removal = true;
            }
        }

        let mut events = Vec::new();
        if additions > 0 {
            let mut placement = Placement::prepare(&self.ds, runtime, allow, &members).await?;
            if !placement.has_candidates() {
                tracing::warn!(
                    parent = %parent.id,
                    slot = %slot,
                    runtime,
                    "no eligible domain, deferring placement to reconciliation"
                );
            }
            for _ in 0..additions {
                events.push(SchedulingEvent::add(
                    parent.id.clone(),
                    slot.clone(),
                    placement.next(),
                ));
            }
        } else if removal {
            if let Some(victim) = members.choose(&mut rand::thread_rng()) {
                events.push(SchedulingEvent::remove(
                    parent.id.clone(),
                    slot.clone(),
                    victim.id.clone(),
                ));
            }
        }

        tracing::debug!(
            parent = %parent.id,
            slot = %slot,
            count,
            ?cpu,
            decisions = events.len(),
            "scheduled basic slot"
        );
        Ok(events)
    }

    async fn schedule_composite(
        &self,
        parent: &Instance,
        slot: &SlotName,
        cardinality: Cardinality,
    ) -> Result<Vec<SchedulingEvent>> {
        let children: Vec<Instance> = self
            .ds
            .find(
                &Query::all()
                    .eq("parent", parent.id.to_string())
                    .eq("slot", slot)
                    .field(
                        "state",
                        Predicate::In(vec![
                            serde_json::json!(InstanceState::Init),
                            serde_json::json!(InstanceState::Ready),
                        ]),
                    ),
                SearchOptions::default(),
            )
            .await?;
        let count = children.len() as u32;

        let mut events = Vec::new();
        if count < cardinality.min {
            for _ in count..cardinality.min {
                events.push(SchedulingEvent::add(parent.id.clone(), slot.clone(), None));
            }
        } else if cardinality.min == 0 && count == 0 {
            // Composites default to singleton unless told otherwise.
            events.push(SchedulingEvent::add(parent.id.clone(), slot.clone(), None));
        } else if cardinality.max.is_some_and(|max| count > max) {
            if let Some(victim) = children.choose(&mut rand::thread_rng()) {
                events.push(SchedulingEvent::remove(
                    parent.id.clone(),
                    slot.clone(),
                    victim.id.clone(),
                ));
            }
        }

        tracing::debug!(
            parent = %parent.id,
            slot = %slot,
            count,
            decisions = events.len(),
            "scheduled composite slot"
        );
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use trellis_store::MemoryStore;
    use trellis_types::{
        BasicModel, CompositeModel, Domain, DomainState, Durability, Endpoint, InstanceKind,
        SchedulingEventKind, Subcomponent,
    };

    fn basic_model() -> Model {
        Model::Basic(BasicModel {
            runtime: "docker".into(),
            source: "registry/app:1".into(),
            durability: Durability::Ephemeral,
            endpoints: BTreeMap::new(),
            variables: BTreeMap::new(),
            volumes: BTreeMap::new(),
            events: Vec::new(),
        })
    }

    fn composite_parent(slot: &str, slot_model: Model, cardinality: &str) -> Instance {
        let composite = CompositeModel {
            imports: [("Slot".to_string(), slot_model)].into_iter().collect(),
            subcomponents: [(
                slot.to_string(),
                Subcomponent {
                    type_name: "Slot".into(),
                    cardinality: cardinality.parse().unwrap(),
                    durability: Durability::Ephemeral,
                    domains: Vec::new(),
                    variables: BTreeMap::new(),
                    schedule: None,
                },
            )]
            .into_iter()
            .collect(),
            connectors: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            variables: BTreeMap::new(),
            domains: Vec::new(),
        };
        Instance::composite(None, None, Model::Composite(composite))
    }

    async fn fixture(cardinality: &str) -> (Datastore, Scheduler, Instance, Collection) {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        let mut domain = Domain::new("alpha", "simulated", vec!["docker".into()]);
        domain.state = DomainState::Ready;
        ds.put(&domain).await.unwrap();

        let parent = composite_parent("web", basic_model(), cardinality);
        ds.put(&parent).await.unwrap();

        let backing = BasicModel {
            runtime: "docker".into(),
            source: "registry/app:1".into(),
            durability: Durability::Ephemeral,
            endpoints: BTreeMap::new(),
            variables: BTreeMap::new(),
            volumes: BTreeMap::new(),
            events: Vec::new(),
        };
        let collection = Collection::for_slot(
            parent.id.clone(),
            SlotName::Subcomponent("web".into()),
            &backing,
            Vec::new(),
        );
        ds.put(&collection).await.unwrap();

        let scheduler = Scheduler::new(ds.clone());
        (ds, scheduler, parent, collection)
    }

    async fn seed_members(
        ds: &Datastore,
        parent: &Instance,
        collection: &Collection,
        count: usize,
        state: InstanceState,
    ) -> Vec<Instance> {
        let mut members = Vec::new();
        for _ in 0..count {
            let mut member = Instance::basic(
                parent.id.clone(),
                collection.name.clone(),
                collection.id.clone(),
                None,
            );
            member.state = state;
            ds.put(&member).await.unwrap();
            members.push(member);
        }
        members
    }

    #[tokio::test]
    async fn singleton_composite_slot_gets_exactly_one_add() {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        let inner = Model::Composite(CompositeModel {
            imports: BTreeMap::new(),
            subcomponents: BTreeMap::new(),
            connectors: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            variables: BTreeMap::new(),
            domains: Vec::new(),
        });
        let parent = composite_parent("app", inner, "[1:1]");
        ds.put(&parent).await.unwrap();

        let scheduler = Scheduler::new(ds);
        let events = scheduler
            .schedule(&parent, &SlotName::Subcomponent("app".into()), None)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SchedulingEventKind::InstanceAdd);
    }

    #[tokio::test]
    async fn floor_is_enforced_before_anything_else() {
        let (ds, scheduler, parent, collection) = fixture("[2:5]").await;
        seed_members(&ds, &parent, &collection, 1, InstanceState::Ready).await;

        let events = scheduler
            .schedule(&parent, &collection.name, None)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SchedulingEventKind::InstanceAdd);
        assert!(events[0].domain.is_some());
    }

    #[tokio::test]
    async fn hot_collection_scales_up() {
        let (ds, scheduler, parent, mut collection) = fixture("[:10]").await;
        seed_members(&ds, &parent, &collection, 3, InstanceState::Ready).await;
        collection.cpu = Some(0.85);
        ds.save(&collection).await.unwrap();

        let events = scheduler
            .schedule(&parent, &collection.name, None)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SchedulingEventKind::InstanceAdd);
    }

    #[tokio::test]
    async fn over_max_removal_beats_metric_rules() {
        let (ds, scheduler, parent, mut collection) = fixture("[2:4]").await;
        let members = seed_members(&ds, &parent, &collection, 5, InstanceState::Ready).await;
        // Hot CPU must not stop the over-max removal.
        collection.cpu = Some(0.95);
        ds.save(&collection).await.unwrap();

        let events = scheduler
            .schedule(&parent, &collection.name, None)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SchedulingEventKind::InstanceRemove);
        let victim = events[0].instance.clone().unwrap();
        assert!(members.iter().any(|m| m.id == victim));
    }

    #[tokio::test]
    async fn idle_collection_scales_down_to_min() {
        let (ds, scheduler, parent, mut collection) = fixture("[2:5]").await;
        seed_members(&ds, &parent, &collection, 3, InstanceState::Ready).await;
        collection.cpu = Some(0.10);
        ds.save(&collection).await.unwrap();

        let events = scheduler
            .schedule(&parent, &collection.name, None)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SchedulingEventKind::InstanceRemove);
    }

    #[tokio::test]
    async fn basic_slot_tops_up_to_the_replica_floor() {
        let (ds, scheduler, parent, collection) = fixture("[:5]").await;
        seed_members(&ds, &parent, &collection, 1, InstanceState::Ready).await;

        let events = scheduler
            .schedule(&parent, &collection.name, None)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SchedulingEventKind::InstanceAdd);
    }

    #[tokio::test]
    async fn converged_slot_is_left_alone() {
        let (ds, scheduler, parent, collection) = fixture("[2:5]").await;
        seed_members(&ds, &parent, &collection, 2, InstanceState::Ready).await;

        let events = scheduler
            .schedule(&parent, &collection.name, None)
            .await
            .unwrap();
        assert!(events.is_empty());
    }
}
