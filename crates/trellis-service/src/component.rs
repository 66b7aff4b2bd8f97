//! Component operations.
//!
//! The write operations return immediately with a `started` transaction
//! and run the actual pipeline in a background task; clients poll the
//! transaction for the outcome. The add pipeline is resolve, build,
//! connect, populate, in that order, so links exist before any member
//! instance is enrolled.

use crate::error::{Result, ServiceError};
use crate::transaction::TransactionService;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use trellis_model::{Deployment, ModelResolver};
use trellis_store::{Datastore, Query, SearchOptions};
use trellis_topology::{TreeBuilder, TreeConnector};
use trellis_types::{Collection, Instance, InstanceId, Link, Model, Transaction};

/// One whole component tree, assembled for read APIs.
#[derive(Debug, serde::Serialize)]
pub struct Graph {
    pub root: InstanceId,
    pub instances: Vec<Instance>,
    pub collections: Vec<Collection>,
    pub links: Vec<Link>,
}

/// Transactional operations on component trees.
#[derive(Clone)]
pub struct ComponentService {
    ds: Datastore,
    resolver: Arc<ModelResolver>,
    builder: Arc<TreeBuilder>,
    connector: Arc<TreeConnector>,
    txs: TransactionService,
}

impl ComponentService {
    pub fn new(
        ds: Datastore,
        resolver: Arc<ModelResolver>,
        builder: Arc<TreeBuilder>,
        connector: Arc<TreeConnector>,
        txs: TransactionService,
    ) -> Self {
        Self {
            ds,
            resolver,
            builder,
            connector,
            txs,
        }
    }

    /// Resolve `raw` under `deployment` and instantiate the resulting
    /// tree. Returns the started transaction; its target is the root
    /// instance id once completed.
    pub async fn add_instance(&self, deployment: Deployment, raw: Value) -> Result<Transaction> {
        let tx = self
            .txs
            .begin("add-instance", json!({"deployment": deployment, "model": raw}))
            .await?;

        let service = self.clone();
        let tx_id = tx.id.clone();
        tokio::spawn(async move {
            let outcome = service.run_add(deployment, raw).await;
            service.settle(&tx_id, outcome).await;
        });
        Ok(tx)
    }

    async fn run_add(&self, deployment: Deployment, raw: Value) -> Result<String> {
        let model = self.resolver.resolve(&deployment, raw).await?;
        let tree = self.builder.build(None, None, &model).await?;
        self.connector.connect(&tree).await?;
        self.builder.populate(&tree).await?;
        tracing::info!(root = %tree.root.id, "component tree instantiated");
        Ok(tree.root.id.to_string())
    }

    /// Re-resolve a composite root's model in place. The reconciliation
    /// daemons converge the running tree toward the new model.
    pub async fn update_instance(
        &self,
        id: &InstanceId,
        deployment: Deployment,
        raw: Value,
    ) -> Result<Transaction> {
        let tx = self
            .txs
            .begin(
                "update-instance",
                json!({"instance": id, "deployment": deployment, "model": raw}),
            )
            .await?;

        let service = self.clone();
        let tx_id = tx.id.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let outcome = service.run_update(&id, deployment, raw).await;
            service.settle(&tx_id, outcome).await;
        });
        Ok(tx)
    }

    async fn run_update(
        &self,
        id: &InstanceId,
        deployment: Deployment,
        raw: Value,
    ) -> Result<String> {
        let instance: Instance = self.ds.require(&id.to_string()).await?;
        if instance.model.is_none() {
            return Err(ServiceError::InvalidRequest(format!(
                "instance {id} carries no model to update"
            )));
        }
        let model = self.resolver.resolve(&deployment, raw).await?;
        if !model.is_composite() {
            return Err(ServiceError::InvalidRequest(
                "updated model must be composite".into(),
            ));
        }
        self.ds
            .patch_id::<Instance>(&id.to_string(), json!({"model": model}))
            .await?;
        Ok(id.to_string())
    }

    /// Flag the subtree rooted at `id` for destruction. The projection
    /// daemon reaps flagged state afterwards.
    pub async fn remove_instance(&self, id: &InstanceId) -> Result<Transaction> {
        let tx = self
            .txs
            .begin("remove-instance", json!({"instance": id}))
            .await?;

        let service = self.clone();
        let tx_id = tx.id.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let outcome = async {
                // Fail fast on unknown ids instead of flagging nothing.
                let _: Instance = service.ds.require(&id.to_string()).await?;
                service.builder.mark_destroy(&id).await?;
                Ok(id.to_string())
            }
            .await;
            service.settle(&tx_id, outcome).await;
        });
        Ok(tx)
    }

    async fn settle(&self, tx_id: &trellis_types::TransactionId, outcome: Result<String>) {
        let result = match outcome {
            Ok(target) => self.txs.complete(tx_id, Some(target)).await,
            Err(err) => self.txs.abort(tx_id, &err.to_string()).await,
        };
        if let Err(err) = result {
            tracing::error!(tx = %tx_id, %err, "failed to settle transaction");
        }
    }

    pub async fn get_instance(&self, id: &InstanceId) -> Result<Instance> {
        Ok(self.ds.require(&id.to_string()).await?)
    }

    pub async fn list_instances(&self) -> Result<Vec<Instance>> {
        Ok(self.ds.find(&Query::all(), SearchOptions::default()).await?)
    }

    pub async fn list_collections(&self) -> Result<Vec<Collection>> {
        Ok(self.ds.find(&Query::all(), SearchOptions::default()).await?)
    }

    pub async fn list_links(&self) -> Result<Vec<Link>> {
        Ok(self.ds.find(&Query::all(), SearchOptions::default()).await?)
    }

    /// Assemble every component tree from three whole-table reads.
    pub async fn list_graphs(&self) -> Result<Vec<Graph>> {
        let instances = self.list_instances().await?;
        let collections = self.list_collections().await?;
        let links = self.list_links().await?;

        let mut children: HashMap<InstanceId, Vec<&Instance>> = HashMap::new();
        for instance in &instances {
            if let Some(parent) = &instance.parent {
                children.entry(parent.clone()).or_default().push(instance);
            }
        }

        let mut graphs = Vec::new();
        for root in instances.iter().filter(|i| i.parent.is_none()) {
            let mut members = Vec::new();
            let mut ids = HashSet::new();
            let mut frontier = vec![root];
            while let Some(current) = frontier.pop() {
                ids.insert(current.id.clone());
                members.push(current.clone());
                if let Some(next) = children.get(&current.id) {
                    frontier.extend(next.iter().copied());
                }
            }

            let graph_collections: Vec<Collection> = collections
                .iter()
                .filter(|c| ids.contains(&c.parent))
                .cloned()
                .collect();
            let collection_ids: HashSet<_> =
                graph_collections.iter().map(|c| c.id.clone()).collect();
            let graph_links = links
                .iter()
                .filter(|l| collection_ids.contains(&l.src) || collection_ids.contains(&l.dst))
                .cloned()
                .collect();

            graphs.push(Graph {
                root: root.id.clone(),
                instances: members,
                collections: graph_collections,
                links: graph_links,
            });
        }
        Ok(graphs)
    }

    /// The resolved model of one instance, if it carries one.
    pub async fn get_model(&self, id: &InstanceId) -> Result<Model> {
        let instance = self.get_instance(id).await?;
        instance
            .model
            .ok_or_else(|| ServiceError::NotFound(format!("model of instance {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use trellis_scheduler::Scheduler;
    use trellis_store::{MemoryStore, RetryPolicy};
    use trellis_types::{
        CollectionState, Domain, DomainState, InstanceState, TransactionId, TransactionState,
    };

    fn service(ds: &Datastore) -> ComponentService {
        let scheduler = Arc::new(Scheduler::new(ds.clone()));
        let builder = Arc::new(TreeBuilder::new(
            ds.clone(),
            scheduler,
            RetryPolicy::fast(),
        ));
        let connector = Arc::new(TreeConnector::new(ds.clone()));
        ComponentService::new(
            ds.clone(),
            Arc::new(ModelResolver::new()),
            builder,
            connector,
            TransactionService::new(ds.clone()),
        )
    }

    async fn seed_domain(ds: &Datastore) {
        let mut domain = Domain::new("alpha", "simulated", vec!["docker".into()]);
        domain.state = DomainState::Ready;
        ds.put(&domain).await.unwrap();
    }

    fn producer_consumer() -> Value {
        json!({
            "type": "composite",
            "imports": {
                "P": {
                    "type": "basic",
                    "runtime": "docker",
                    "source": "registry/p:1",
                    "endpoints": {"e": {"direction": "out", "protocol": "tcp:80"}}
                },
                "C": {
                    "type": "basic",
                    "runtime": "docker",
                    "source": "registry/c:1",
                    "endpoints": {"f": {"direction": "in", "protocol": "tcp:80"}}
                }
            },
            "subcomponents": {
                "p": {"type": "P"},
                "c": {"type": "C"}
            },
            "connectors": {
                "wire": {
                    "type": "Link",
                    "inputs": [{"subcomponent": "p", "endpoint": "e"}],
                    "outputs": [{"subcomponent": "c", "endpoint": "f"}]
                }
            }
        })
    }

    async fn wait_settled(txs: &TransactionService, id: &TransactionId) -> Transaction {
        for _ in 0..100 {
            let tx = txs.get(id).await.unwrap();
            if tx.state.is_terminal() {
                return tx;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("transaction {id} never settled");
    }

    #[tokio::test]
    async fn add_instance_builds_a_full_tree() {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        seed_domain(&ds).await;
        let service = service(&ds);

        let tx = service
            .add_instance(Deployment::default(), producer_consumer())
            .await
            .unwrap();
        let settled = wait_settled(&service.txs, &tx.id).await;
        assert_eq!(settled.state, TransactionState::Completed);

        let root_id: InstanceId = settled.target.unwrap().parse().unwrap();
        let root = service.get_instance(&root_id).await.unwrap();
        assert!(root.model.is_some());

        let collections = service.list_collections().await.unwrap();
        assert_eq!(collections.len(), 2);
        assert!(collections
            .iter()
            .all(|c| c.state == CollectionState::Init && c.members.len() == 2));

        let links = service.list_links().await.unwrap();
        assert_eq!(links.len(), 1);

        let graphs = service.list_graphs().await.unwrap();
        assert_eq!(graphs.len(), 1);
        assert_eq!(graphs[0].root, root_id);
        // Root plus four members.
        assert_eq!(graphs[0].instances.len(), 5);
        assert_eq!(graphs[0].links.len(), 1);
    }

    #[tokio::test]
    async fn add_instance_aborts_on_a_bad_model() {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        let service = service(&ds);

        let tx = service
            .add_instance(
                Deployment::default(),
                json!({"type": "basic", "runtime": "docker", "source": "app:1"}),
            )
            .await
            .unwrap();
        let settled = wait_settled(&service.txs, &tx.id).await;
        assert_eq!(settled.state, TransactionState::Aborted);
        assert!(settled.err.is_some());
    }

    #[tokio::test]
    async fn remove_instance_flags_the_tree() {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        seed_domain(&ds).await;
        let service = service(&ds);

        let tx = service
            .add_instance(Deployment::default(), producer_consumer())
            .await
            .unwrap();
        let root_id: InstanceId = wait_settled(&service.txs, &tx.id)
            .await
            .target
            .unwrap()
            .parse()
            .unwrap();

        let tx = service.remove_instance(&root_id).await.unwrap();
        let settled = wait_settled(&service.txs, &tx.id).await;
        assert_eq!(settled.state, TransactionState::Completed);

        let instances = service.list_instances().await.unwrap();
        assert!(instances.iter().all(|i| i.state == InstanceState::Destroy));
    }

    #[tokio::test]
    async fn remove_instance_aborts_on_unknown_id() {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        let service = service(&ds);

        let tx = service
            .remove_instance(&InstanceId::generate())
            .await
            .unwrap();
        let settled = wait_settled(&service.txs, &tx.id).await;
        assert_eq!(settled.state, TransactionState::Aborted);
    }
}
