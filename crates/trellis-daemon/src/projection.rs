//! The projection daemon.
//!
//! Projects the desired state recorded in the store onto the execution
//! domains: collections and links are created on their target domains,
//! unplaced members are placed and materialized, proxies mirror
//! members across federated domains, and everything flagged `destroy`
//! or `failed` is unwound and reaped. Every step tolerates being run
//! again; a pass over converged state writes nothing.
//!
//! Pass order matters only for destruction: links are unwired before
//! their collections disappear, and a destroyed composite instance row
//! is deleted last, once nothing below it remains.

use crate::config::ProjectionConfig;
use crate::error::Result;
use crate::schedule::children_first;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::interval;
use trellis_domain::DriverRegistry;
use trellis_scheduler::Placement;
use trellis_store::{
    CollectionGuard, Datastore, Predicate, Query, SearchOptions,
};
use trellis_types::{
    Collection, CollectionState, Domain, DomainState, Instance, InstanceKind, InstanceState, Link,
    LinkState, SlotName,
};

/// Periodic projection of store state onto domains.
pub struct ProjectionDaemon {
    config: ProjectionConfig,
    ds: Datastore,
    registry: Arc<DriverRegistry>,
    running: Arc<RwLock<bool>>,
}

impl ProjectionDaemon {
    pub fn new(config: ProjectionConfig, ds: Datastore, registry: Arc<DriverRegistry>) -> Self {
        Self {
            config,
            ds,
            registry,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Run the projection loop until [`ProjectionDaemon::stop`].
    pub async fn start(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }
        tracing::info!(interval_secs = self.config.interval_secs, "projection daemon started");

        let mut ticker = interval(self.config.interval());
        loop {
            ticker.tick().await;
            if !*self.running.read().await {
                break;
            }
            if let Err(err) = self.pass().await {
                tracing::error!(error = %err, "projection pass failed");
            }
        }
        tracing::info!("projection daemon stopped");
    }

    /// Stop after the in-flight pass finishes.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// One full projection pass.
    pub async fn pass(&self) -> Result<()> {
        self.reap_links().await?;
        self.reap_collections().await?;
        self.reap_composites().await?;
        self.sync_collections().await?;
        self.sync_links().await?;
        self.sync_instances().await?;
        Ok(())
    }

    /// Unwire and delete links flagged `destroy`.
    async fn reap_links(&self) -> Result<()> {
        let doomed: Vec<Link> = self
            .ds
            .find(
                &Query::all().eq("state", LinkState::Destroy),
                SearchOptions::default(),
            )
            .await?;
        for link in doomed {
            for domain in self.link_domains(&link).await? {
                let driver = self.registry.for_domain(&domain)?;
                driver.remove_link(&domain, &link).await?;
            }
            self.ds.remove_id::<Link>(&link.id.to_string()).await?;
            tracing::debug!(link = %link.id, "reaped link");
        }
        Ok(())
    }

    /// Unwind and delete collections flagged `destroy`, members first.
    async fn reap_collections(&self) -> Result<()> {
        let doomed: Vec<Collection> = self
            .ds
            .find(
                &Query::all().eq("state", CollectionState::Destroy),
                SearchOptions::default(),
            )
            .await?;
        for collection in doomed {
            let members: Vec<Instance> = self
                .ds
                .find(
                    &Query::all().eq("collection", collection.id.to_string()),
                    SearchOptions::default(),
                )
                .await?;
            for member in &members {
                self.remove_from_domain(member).await?;
                self.ds.remove_id::<Instance>(&member.id.to_string()).await?;
            }

            for domain in self.target_domains(&collection).await? {
                let driver = self.registry.for_domain(&domain)?;
                driver.remove_collection(&domain, &collection).await?;
            }
            self.ds
                .remove_id::<Collection>(&collection.id.to_string())
                .await?;
            tracing::info!(collection = %collection.id, members = members.len(), "reaped collection");
        }
        Ok(())
    }

    /// Delete `destroy` composite instance rows whose subtrees are
    /// fully unwound.
    async fn reap_composites(&self) -> Result<()> {
        let doomed: Vec<Instance> = self
            .ds
            .find(
                &Query::all()
                    .eq("kind", InstanceKind::Composite)
                    .eq("state", InstanceState::Destroy),
                SearchOptions::default(),
            )
            .await?;
        for instance in doomed {
            let children = self
                .ds
                .find::<Instance>(
                    &Query::all().eq("parent", instance.id.to_string()),
                    SearchOptions::default().with_limit(1),
                )
                .await?;
            let collections = self
                .ds
                .find::<Collection>(
                    &Query::all().eq("parent", instance.id.to_string()),
                    SearchOptions::default().with_limit(1),
                )
                .await?;
            if children.is_empty() && collections.is_empty() {
                self.ds.remove_id::<Instance>(&instance.id.to_string()).await?;
                tracing::debug!(instance = %instance.id, "reaped composite instance");
            }
        }
        Ok(())
    }

    /// Drive every live collection toward its domains.
    async fn sync_collections(&self) -> Result<()> {
        let live: Vec<Collection> = self
            .ds
            .find(
                &Query::all().field(
                    "state",
                    Predicate::In(vec![
                        json!(CollectionState::Preinit),
                        json!(CollectionState::Init),
                        json!(CollectionState::Ready),
                    ]),
                ),
                SearchOptions::default(),
            )
            .await?;
        for collection in &live {
            if let Err(err) = self.update_collection(collection).await {
                tracing::error!(collection = %collection.id, error = %err, "failed to update collection");
            }
        }
        Ok(())
    }

    /// Place, materialize, reap and mirror the members of one
    /// collection, then promote it once everything is materialized.
    async fn update_collection(&self, collection: &Collection) -> Result<()> {
        let Some(parent) = self.ds.get::<Instance>(&collection.parent.to_string()).await? else {
            tracing::warn!(collection = %collection.id, "parent instance missing, skipping");
            return Ok(());
        };
        let Some(runtime) = backing_runtime(&parent, &collection.name) else {
            tracing::warn!(collection = %collection.id, "no basic backing model, skipping");
            return Ok(());
        };

        let domains = self.target_domains(collection).await?;
        if domains.is_empty() {
            tracing::warn!(collection = %collection.id, "no ready target domain");
            return Ok(());
        }
        for domain in &domains {
            let driver = self.registry.for_domain(domain)?;
            driver.add_collection(domain, collection).await?;
        }

        let members: Vec<Instance> = self
            .ds
            .find(
                &Query::all()
                    .eq("collection", collection.id.to_string())
                    .field("proxy_of", Predicate::Exists(false)),
                SearchOptions::default(),
            )
            .await?;

        let mut placement =
            Placement::prepare(&self.ds, &runtime, &collection.domains, &members).await?;
        let mut reap: Vec<Instance> = Vec::new();
        let mut all_ready = true;

        for member in &members {
            match member.state {
                InstanceState::Init => {
                    let domain_id = match &member.domain {
                        Some(id) => id.clone(),
                        None => match placement.next() {
                            Some(id) => {
                                self.ds
                                    .patch_id::<Instance>(
                                        &member.id.to_string(),
                                        json!({"domain": id}),
                                    )
                                    .await?;
                                id
                            }
                            None => {
                                tracing::warn!(member = %member.id, "no eligible domain for member");
                                all_ready = false;
                                continue;
                            }
                        },
                    };
                    let Some(domain) = domains.iter().find(|d| d.id == domain_id) else {
                        tracing::warn!(member = %member.id, domain = %domain_id, "member placed outside target domains");
                        all_ready = false;
                        continue;
                    };
                    let driver = self.registry.for_domain(domain)?;
                    let mut placed = member.clone();
                    placed.domain = Some(domain_id);
                    match driver.add_instance(domain, collection, &placed).await {
                        Ok(addr) => {
                            self.ds
                                .patch_id::<Instance>(
                                    &member.id.to_string(),
                                    json!({"addr": addr, "state": InstanceState::Ready}),
                                )
                                .await?;
                        }
                        Err(err) => {
                            tracing::warn!(member = %member.id, error = %err, "materialization failed");
                            self.ds
                                .patch_id::<Instance>(
                                    &member.id.to_string(),
                                    json!({"state": InstanceState::Failed}),
                                )
                                .await?;
                            all_ready = false;
                        }
                    }
                }
                InstanceState::Ready => {}
                InstanceState::Failed | InstanceState::Destroy => {
                    reap.push(member.clone());
                    all_ready = false;
                }
            }
        }

        if !reap.is_empty() {
            let mut guard =
                CollectionGuard::acquire(&self.ds, &collection.id, &self.config.lock_retry())
                    .await?;
            for member in &reap {
                self.remove_from_domain(member).await?;
                guard.remove_member(&member.id);
                self.ds.remove_id::<Instance>(&member.id.to_string()).await?;
                tracing::info!(member = %member.id, collection = %collection.id, "reaped member");
            }
            guard.commit().await?;
        }

        self.reconcile_proxies(collection, &domains, &members).await?;

        if collection.state == CollectionState::Init && !members.is_empty() && all_ready {
            self.ds
                .patch_id::<Collection>(
                    &collection.id.to_string(),
                    json!({"state": CollectionState::Ready}),
                )
                .await?;
        }
        Ok(())
    }

    /// Mirror ready members onto every other target domain, and remove
    /// proxies whose original is gone or which failed.
    async fn reconcile_proxies(
        &self,
        collection: &Collection,
        domains: &[Domain],
        members: &[Instance],
    ) -> Result<()> {
        let proxies: Vec<Instance> = self
            .ds
            .find(
                &Query::all()
                    .eq("collection", collection.id.to_string())
                    .field("proxy_of", Predicate::Exists(true)),
                SearchOptions::default(),
            )
            .await?;

        // Stale first: failed proxies, orphans, and proxies on domains
        // no longer targeted.
        for proxy in &proxies {
            let original = proxy
                .proxy_of
                .as_ref()
                .and_then(|id| members.iter().find(|m| &m.id == id));
            let on_target = proxy
                .domain
                .as_ref()
                .is_some_and(|id| domains.iter().any(|d| &d.id == id));
            let stale = proxy.state == InstanceState::Failed
                || !on_target
                || !original.is_some_and(Instance::is_live);
            if stale {
                self.remove_from_domain(proxy).await?;
                self.ds.remove_id::<Instance>(&proxy.id.to_string()).await?;
                tracing::debug!(proxy = %proxy.id, "removed stale proxy");
            }
        }

        if domains.len() < 2 {
            return Ok(());
        }

        for member in members {
            if member.state != InstanceState::Ready {
                continue;
            }
            let Some(home) = &member.domain else { continue };
            for domain in domains.iter().filter(|d| &d.id != home) {
                let exists = proxies.iter().any(|p| {
                    p.proxy_of.as_ref() == Some(&member.id)
                        && p.domain.as_ref() == Some(&domain.id)
                        && p.state != InstanceState::Failed
                });
                if exists {
                    continue;
                }
                let proxy = Instance::proxy_of(member, domain.id.clone());
                self.ds.put(&proxy).await?;
                let driver = self.registry.for_domain(domain)?;
                match driver.add_instance(domain, collection, &proxy).await {
                    Ok(_) => {
                        self.ds
                            .patch_id::<Instance>(
                                &proxy.id.to_string(),
                                json!({"state": InstanceState::Ready}),
                            )
                            .await?;
                        tracing::debug!(proxy = %proxy.id, member = %member.id, domain = %domain.name, "mirrored member");
                    }
                    Err(err) => {
                        tracing::warn!(proxy = %proxy.id, error = %err, "proxy materialization failed");
                        self.ds
                            .patch_id::<Instance>(
                                &proxy.id.to_string(),
                                json!({"state": InstanceState::Failed}),
                            )
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Wire links flagged `init` on every involved domain.
    async fn sync_links(&self) -> Result<()> {
        let pending: Vec<Link> = self
            .ds
            .find(
                &Query::all().eq("state", LinkState::Init),
                SearchOptions::default(),
            )
            .await?;
        for link in pending {
            let domains = self.link_domains(&link).await?;
            if domains.is_empty() {
                continue;
            }
            let mut wired = true;
            for domain in &domains {
                let driver = self.registry.for_domain(domain)?;
                if let Err(err) = driver.add_link(domain, &link).await {
                    tracing::warn!(link = %link.id, domain = %domain.name, error = %err, "link wiring failed");
                    wired = false;
                }
            }
            if wired {
                self.ds
                    .patch_id::<Link>(&link.id.to_string(), json!({"state": LinkState::Ready}))
                    .await?;
            }
        }
        Ok(())
    }

    /// Take in domain failure reports, then promote composite
    /// instances whose whole subtree is ready.
    async fn sync_instances(&self) -> Result<()> {
        self.intake_failures().await?;

        let pending: Vec<Instance> = self
            .ds
            .find(
                &Query::all()
                    .eq("kind", InstanceKind::Composite)
                    .eq("state", InstanceState::Init),
                SearchOptions::default(),
            )
            .await?;

        for instance in children_first(pending) {
            let collections: Vec<Collection> = self
                .ds
                .find(
                    &Query::all().eq("parent", instance.id.to_string()),
                    SearchOptions::default(),
                )
                .await?;
            let children: Vec<Instance> = self
                .ds
                .find(
                    &Query::all()
                        .eq("parent", instance.id.to_string())
                        .eq("kind", InstanceKind::Composite),
                    SearchOptions::default(),
                )
                .await?;

            let ready = collections.iter().all(|c| c.state == CollectionState::Ready)
                && children
                    .iter()
                    .all(|c| c.state == InstanceState::Ready || c.state == InstanceState::Destroy);
            if ready {
                self.ds
                    .patch_id::<Instance>(
                        &instance.id.to_string(),
                        json!({"state": InstanceState::Ready}),
                    )
                    .await?;
                tracing::info!(instance = %instance.id, "composite instance ready");
            }
        }
        Ok(())
    }

    /// Pull failure reports from every ready domain. Real members get
    /// their canonical row marked `failed`, failed proxies are removed
    /// outright, and each touched collection is re-run so replacements
    /// land in the same pass.
    async fn intake_failures(&self) -> Result<()> {
        let domains: Vec<Domain> = self
            .ds
            .find(
                &Query::all().eq("state", DomainState::Ready),
                SearchOptions::default(),
            )
            .await?;

        let mut touched: Vec<String> = Vec::new();
        for domain in &domains {
            let driver = self.registry.for_domain(domain)?;
            let reported = match driver.failed_instances(domain).await {
                Ok(ids) => ids,
                Err(err) => {
                    tracing::warn!(domain = %domain.name, error = %err, "failure report unavailable");
                    continue;
                }
            };
            for id in reported {
                let Some(instance) = self.ds.get::<Instance>(&id).await? else {
                    continue;
                };
                if instance.is_proxy() {
                    self.remove_from_domain(&instance).await?;
                    self.ds.remove_id::<Instance>(&id).await?;
                    tracing::info!(proxy = %instance.id, domain = %domain.name, "removed failed proxy");
                } else if instance.state == InstanceState::Ready {
                    self.ds
                        .patch_id::<Instance>(&id, json!({"state": InstanceState::Failed}))
                        .await?;
                    tracing::info!(member = %instance.id, domain = %domain.name, "domain reported member failed");
                }
                if let Some(collection) = &instance.collection {
                    let collection = collection.to_string();
                    if !touched.contains(&collection) {
                        touched.push(collection);
                    }
                }
            }
        }

        for id in touched {
            let Some(collection) = self.ds.get::<Collection>(&id).await? else {
                continue;
            };
            if let Err(err) = self.update_collection(&collection).await {
                tracing::error!(collection = %collection.id, error = %err, "failed to update collection");
            }
        }
        Ok(())
    }

    /// The ready domains a collection targets: its allow-list when it
    /// has one, every ready domain otherwise.
    async fn target_domains(&self, collection: &Collection) -> Result<Vec<Domain>> {
        let ready: Vec<Domain> = self
            .ds
            .find(
                &Query::all().eq("state", DomainState::Ready),
                SearchOptions::default(),
            )
            .await?;
        if collection.domains.is_empty() {
            return Ok(ready);
        }
        Ok(ready
            .into_iter()
            .filter(|d| collection.domains.contains(&d.name))
            .collect())
    }

    /// Every domain a link touches: the union of both sides' target
    /// domains. Missing collections contribute nothing.
    async fn link_domains(&self, link: &Link) -> Result<Vec<Domain>> {
        let mut domains: Vec<Domain> = Vec::new();
        for id in [&link.src, &link.dst] {
            let Some(collection) = self.ds.get::<Collection>(&id.to_string()).await? else {
                continue;
            };
            for domain in self.target_domains(&collection).await? {
                if !domains.iter().any(|d| d.id == domain.id) {
                    domains.push(domain);
                }
            }
        }
        Ok(domains)
    }

    /// Remove one instance from its hosting domain, if it has one.
    async fn remove_from_domain(&self, instance: &Instance) -> Result<()> {
        let Some(domain_id) = &instance.domain else {
            return Ok(());
        };
        let Some(domain) = self.ds.get::<Domain>(&domain_id.to_string()).await? else {
            return Ok(());
        };
        let driver = self.registry.for_domain(&domain)?;
        driver.remove_instance(&domain, instance).await?;
        Ok(())
    }
}

/// The runtime of the basic model backing one collection slot.
fn backing_runtime(parent: &Instance, slot: &SlotName) -> Option<String> {
    let composite = parent.model.as_ref()?.as_composite()?;
    let model = match slot {
        SlotName::Subcomponent(name) => composite.subcomponent_model(name)?,
        SlotName::Connector(name) => composite.connector_model(name)?,
    };
    model.as_basic().map(|basic| basic.runtime.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use trellis_domain::{DomainDriver, SimulatedDriver};
    use trellis_scheduler::Scheduler;
    use trellis_store::{MemoryStore, RetryPolicy};
    use trellis_topology::{TreeBuilder, TreeConnector};
    use trellis_types::{
        BasicModel, CompositeModel, Connector, ConnectorKind, Direction, Durability, Endpoint,
        EndpointRef, Model, Subcomponent,
    };

    fn producer_consumer() -> Model {
        let endpoint = |direction, protocol: &str| Endpoint {
            direction,
            protocol: protocol.to_string(),
        };
        let basic = |name: &str, direction| {
            Model::Basic(BasicModel {
                runtime: "docker".into(),
                source: format!("registry/{name}:1"),
                durability: Durability::Ephemeral,
                endpoints: [(name.to_string(), endpoint(direction, "tcp:80"))]
                    .into_iter()
                    .collect(),
                variables: BTreeMap::new(),
                volumes: BTreeMap::new(),
                events: Vec::new(),
            })
        };
        Model::Composite(CompositeModel {
            imports: [
                ("P".to_string(), basic("e", Direction::Out)),
                ("C".to_string(), basic("f", Direction::In)),
            ]
            .into_iter()
            .collect(),
            subcomponents: [
                (
                    "p".to_string(),
                    Subcomponent {
                        type_name: "P".into(),
                        cardinality: Default::default(),
                        durability: Durability::Ephemeral,
                        domains: Vec::new(),
                        variables: BTreeMap::new(),
                        schedule: None,
                    },
                ),
                (
                    "c".to_string(),
                    Subcomponent {
                        type_name: "C".into(),
                        cardinality: Default::default(),
                        durability: Durability::Ephemeral,
                        domains: Vec::new(),
                        variables: BTreeMap::new(),
                        schedule: None,
                    },
                ),
            ]
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

    struct Harness {
        ds: Datastore,
        driver: Arc<SimulatedDriver>,
        builder: TreeBuilder,
        connector: TreeConnector,
        daemon: ProjectionDaemon,
    }

    async fn harness(domain_names: &[&str]) -> Harness {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        let driver = Arc::new(SimulatedDriver::new());
        let registry = Arc::new(DriverRegistry::new());
        registry.register("simulated", driver.clone());

        for name in domain_names {
            let mut domain = Domain::new(*name, "simulated", vec!["docker".into()]);
            domain.state = DomainState::Ready;
            driver.add_domain(&domain).await.unwrap();
            ds.put(&domain).await.unwrap();
        }

        let scheduler = Arc::new(Scheduler::new(ds.clone()));
        let builder = TreeBuilder::new(ds.clone(), scheduler, RetryPolicy::fast());
        let connector = TreeConnector::new(ds.clone());
        let daemon = ProjectionDaemon::new(ProjectionConfig::default(), ds.clone(), registry);
        Harness {
            ds,
            driver,
            builder,
            connector,
            daemon,
        }
    }

    async fn build_tree(h: &Harness) -> trellis_topology::BuiltTree {
        let tree = h.builder.build(None, None, &producer_consumer()).await.unwrap();
        h.connector.connect(&tree).await.unwrap();
        h.builder.populate(&tree).await.unwrap();
        tree
    }

    #[tokio::test]
    async fn pass_converges_a_fresh_tree() {
        let h = harness(&["alpha"]).await;
        let tree = build_tree(&h).await;

        h.daemon.pass().await.unwrap();

        let instances: Vec<Instance> = h
            .ds
            .find(&Query::all(), SearchOptions::default())
            .await
            .unwrap();
        for instance in instances.iter().filter(|i| i.kind == InstanceKind::Basic) {
            assert_eq!(instance.state, InstanceState::Ready);
            assert!(instance.addr.as_deref().unwrap().starts_with("sim://"));
        }
        assert_eq!(h.driver.instance_count(), 4);

        let collections: Vec<Collection> = h
            .ds
            .find(&Query::all(), SearchOptions::default())
            .await
            .unwrap();
        assert!(collections.iter().all(|c| c.state == CollectionState::Ready));

        let links: Vec<Link> = h
            .ds
            .find(&Query::all(), SearchOptions::default())
            .await
            .unwrap();
        assert!(links.iter().all(|l| l.state == LinkState::Ready));

        let root: Instance = h.ds.require(&tree.root.id.to_string()).await.unwrap();
        assert_eq!(root.state, InstanceState::Ready);
    }

    #[tokio::test]
    async fn second_pass_changes_nothing() {
        let h = harness(&["alpha"]).await;
        build_tree(&h).await;

        h.daemon.pass().await.unwrap();
        let before: Vec<Instance> = h
            .ds
            .find(&Query::all(), SearchOptions::default())
            .await
            .unwrap();
        let count_before = h.driver.instance_count();

        h.daemon.pass().await.unwrap();
        let after: Vec<Instance> = h
            .ds
            .find(&Query::all(), SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(before.len(), after.len());
        assert_eq!(h.driver.instance_count(), count_before);
    }

    #[tokio::test]
    async fn failed_member_is_marked_then_reaped() {
        let h = harness(&["alpha"]).await;
        let tree = build_tree(&h).await;

        let members: Vec<Instance> = h
            .ds
            .find(
                &Query::all().eq("kind", InstanceKind::Basic),
                SearchOptions::default(),
            )
            .await
            .unwrap();
        h.driver.fail_instance(&members[0]);

        h.daemon.pass().await.unwrap();
        let failed: Instance = h.ds.require(&members[0].id.to_string()).await.unwrap();
        assert_eq!(failed.state, InstanceState::Failed);

        h.daemon.pass().await.unwrap();
        assert!(h
            .ds
            .get::<Instance>(&members[0].id.to_string())
            .await
            .unwrap()
            .is_none());
        let collection: Collection = h
            .ds
            .require(&members[0].collection.clone().unwrap().to_string())
            .await
            .unwrap();
        assert!(!collection.members.contains(&members[0].id));
        // Short one member until the schedule daemon replaces it.
        assert_eq!(collection.members.len(), 1);
        drop(tree);
    }

    #[tokio::test]
    async fn member_reported_dead_is_reaped_from_its_collection() {
        let h = harness(&["alpha"]).await;
        build_tree(&h).await;
        h.daemon.pass().await.unwrap();

        let members: Vec<Instance> = h
            .ds
            .find(
                &Query::all()
                    .eq("kind", InstanceKind::Basic)
                    .field("proxy_of", Predicate::Exists(false)),
                SearchOptions::default(),
            )
            .await
            .unwrap();
        assert!(members.iter().all(|m| m.state == InstanceState::Ready));
        h.driver.kill_instance(&members[0]);

        h.daemon.pass().await.unwrap();

        assert!(h
            .ds
            .get::<Instance>(&members[0].id.to_string())
            .await
            .unwrap()
            .is_none());
        let collection: Collection = h
            .ds
            .require(&members[0].collection.clone().unwrap().to_string())
            .await
            .unwrap();
        assert!(!collection.members.contains(&members[0].id));
        assert_eq!(h.driver.instance_count(), 3);

        // The report is consumed with the instance.
        h.daemon.pass().await.unwrap();
        assert_eq!(h.driver.instance_count(), 3);
    }

    #[tokio::test]
    async fn failed_proxy_is_removed_and_remirrored() {
        let h = harness(&["alpha", "beta"]).await;
        build_tree(&h).await;
        h.daemon.pass().await.unwrap();
        h.daemon.pass().await.unwrap();

        let proxies: Vec<Instance> = h
            .ds
            .find(
                &Query::all().field("proxy_of", Predicate::Exists(true)),
                SearchOptions::default(),
            )
            .await
            .unwrap();
        let victim = &proxies[0];
        h.driver.kill_instance(victim);

        h.daemon.pass().await.unwrap();

        assert!(h
            .ds
            .get::<Instance>(&victim.id.to_string())
            .await
            .unwrap()
            .is_none());
        let original: Instance = h
            .ds
            .require(&victim.proxy_of.clone().unwrap().to_string())
            .await
            .unwrap();
        assert_eq!(original.state, InstanceState::Ready);

        // A fresh mirror took the dead proxy's place.
        let replacement: Vec<Instance> = h
            .ds
            .find(
                &Query::all()
                    .eq("proxy_of", victim.proxy_of.clone().unwrap().to_string())
                    .eq("domain", victim.domain.clone().unwrap().to_string()),
                SearchOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(replacement.len(), 1);
        assert_ne!(replacement[0].id, victim.id);
        assert_eq!(replacement[0].state, InstanceState::Ready);
    }

    #[tokio::test]
    async fn destroyed_tree_is_fully_reaped() {
        let h = harness(&["alpha"]).await;
        let tree = build_tree(&h).await;
        h.daemon.pass().await.unwrap();

        h.builder.mark_destroy(&tree.root.id).await.unwrap();
        h.daemon.pass().await.unwrap();
        h.daemon.pass().await.unwrap();

        let instances: Vec<Instance> = h
            .ds
            .find(&Query::all(), SearchOptions::default())
            .await
            .unwrap();
        assert!(instances.is_empty());
        let collections: Vec<Collection> = h
            .ds
            .find(&Query::all(), SearchOptions::default())
            .await
            .unwrap();
        assert!(collections.is_empty());
        let links: Vec<Link> = h
            .ds
            .find(&Query::all(), SearchOptions::default())
            .await
            .unwrap();
        assert!(links.is_empty());
        assert_eq!(h.driver.instance_count(), 0);
    }

    #[tokio::test]
    async fn members_are_mirrored_across_federated_domains() {
        let h = harness(&["alpha", "beta"]).await;
        build_tree(&h).await;

        h.daemon.pass().await.unwrap();
        h.daemon.pass().await.unwrap();

        let proxies: Vec<Instance> = h
            .ds
            .find(
                &Query::all().field("proxy_of", Predicate::Exists(true)),
                SearchOptions::default(),
            )
            .await
            .unwrap();
        // Two members per collection, one per domain, each mirrored on
        // the other domain.
        assert_eq!(proxies.len(), 4);
        for proxy in &proxies {
            assert_eq!(proxy.state, InstanceState::Ready);
            let original: Instance = h
                .ds
                .require(&proxy.proxy_of.clone().unwrap().to_string())
                .await
                .unwrap();
            assert_ne!(original.domain, proxy.domain);
        }
    }
}
