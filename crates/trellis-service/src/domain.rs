//! Domain operations.
//!
//! Registration and removal touch the backend through the driver
//! registry and report through transactions like every other mutation.
//! A domain only becomes `ready`, and therefore eligible for
//! placement, after its driver acknowledged it.

use crate::error::{Result, ServiceError};
use crate::transaction::TransactionService;
use serde_json::json;
use std::sync::Arc;
use trellis_domain::DriverRegistry;
use trellis_store::{join_settled, Datastore, Query, SearchOptions};
use trellis_types::{Collection, Domain, DomainId, DomainState, Instance, Transaction};

/// Transactional operations on domains.
#[derive(Clone)]
pub struct DomainService {
    ds: Datastore,
    registry: Arc<DriverRegistry>,
    txs: TransactionService,
}

impl DomainService {
    pub fn new(ds: Datastore, registry: Arc<DriverRegistry>, txs: TransactionService) -> Self {
        Self { ds, registry, txs }
    }

    /// Register a new domain and prepare it through its driver.
    pub async fn add_domain(
        &self,
        name: &str,
        driver: &str,
        runtimes: Vec<String>,
    ) -> Result<Transaction> {
        let tx = self
            .txs
            .begin(
                "add-domain",
                json!({"name": name, "driver": driver, "runtimes": runtimes}),
            )
            .await?;

        let domain = Domain::new(name, driver, runtimes);
        self.ds.put(&domain).await?;

        let service = self.clone();
        let tx_id = tx.id.clone();
        tokio::spawn(async move {
            let outcome = async {
                let driver = service.registry.for_domain(&domain)?;
                driver.add_domain(&domain).await?;
                service
                    .ds
                    .patch_id::<Domain>(
                        &domain.id.to_string(),
                        json!({"state": DomainState::Ready}),
                    )
                    .await?;
                Ok(domain.id.to_string())
            }
            .await;

            if outcome.is_err() {
                let _ = service
                    .ds
                    .patch_id::<Domain>(
                        &domain.id.to_string(),
                        json!({"state": DomainState::Failed}),
                    )
                    .await;
            }
            service.settle(&tx_id, outcome).await;
        });
        Ok(tx)
    }

    /// Unregister a domain, tearing down its backend state.
    pub async fn remove_domain(&self, id: &DomainId) -> Result<Transaction> {
        let domain: Domain = self.ds.require(&id.to_string()).await?;
        let tx = self
            .txs
            .begin("remove-domain", json!({"domain": id}))
            .await?;

        self.ds
            .patch_id::<Domain>(&id.to_string(), json!({"state": DomainState::Destroy}))
            .await?;

        let service = self.clone();
        let tx_id = tx.id.clone();
        tokio::spawn(async move {
            let outcome = async {
                let driver = service.registry.for_domain(&domain)?;
                driver.remove_domain(&domain).await?;
                service.ds.remove_id::<Domain>(&domain.id.to_string()).await?;
                Ok(domain.id.to_string())
            }
            .await;
            service.settle(&tx_id, outcome).await;
        });
        Ok(tx)
    }

    /// Deliver a lifecycle event to one instance through its domain's
    /// driver.
    pub async fn event_instance(&self, instance: &Instance, event: &str) -> Result<()> {
        let domain_id = instance.domain.as_ref().ok_or_else(|| {
            ServiceError::InvalidRequest(format!("instance {} is not placed", instance.id))
        })?;
        let domain: Domain = self.ds.require(&domain_id.to_string()).await?;
        let driver = self.registry.for_domain(&domain)?;
        driver.event_instance(&domain, instance, event).await?;
        Ok(())
    }

    /// Deliver a lifecycle event to a collection on every domain it
    /// targets.
    pub async fn event_collection(&self, collection: &Collection, event: &str) -> Result<()> {
        let domains = self.target_domains(collection).await?;
        join_settled(domains.iter().map(|domain| {
            let registry = self.registry.clone();
            async move {
                let driver = registry.for_domain(domain)?;
                driver.event_collection(domain, collection, event).await?;
                Ok::<_, ServiceError>(())
            }
        }))
        .await?;
        Ok(())
    }

    pub async fn get_domain(&self, id: &DomainId) -> Result<Domain> {
        Ok(self.ds.require(&id.to_string()).await?)
    }

    pub async fn list_domains(&self) -> Result<Vec<Domain>> {
        Ok(self.ds.find(&Query::all(), SearchOptions::default()).await?)
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

    async fn settle(&self, tx_id: &trellis_types::TransactionId, outcome: Result<String>) {
        let result = match outcome {
            Ok(target) => self.txs.complete(tx_id, Some(target)).await,
            Err(err) => self.txs.abort(tx_id, &err.to_string()).await,
        };
        if let Err(err) = result {
            tracing::error!(tx = %tx_id, %err, "failed to settle transaction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use trellis_domain::SimulatedDriver;
    use trellis_store::MemoryStore;
    use trellis_types::{TransactionId, TransactionState};

    fn service(ds: &Datastore) -> DomainService {
        let registry = Arc::new(DriverRegistry::new());
        registry.register("simulated", Arc::new(SimulatedDriver::new()));
        DomainService::new(ds.clone(), registry, TransactionService::new(ds.clone()))
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
    async fn added_domain_becomes_ready() {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        let service = service(&ds);

        let tx = service
            .add_domain("alpha", "simulated", vec!["docker".into()])
            .await
            .unwrap();
        let settled = wait_settled(&service.txs, &tx.id).await;
        assert_eq!(settled.state, TransactionState::Completed);

        let domains = service.list_domains().await.unwrap();
        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0].state, DomainState::Ready);
    }

    #[tokio::test]
    async fn unknown_driver_fails_the_domain() {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        let service = service(&ds);

        let tx = service
            .add_domain("alpha", "no-such-driver", vec![])
            .await
            .unwrap();
        let settled = wait_settled(&service.txs, &tx.id).await;
        assert_eq!(settled.state, TransactionState::Aborted);

        let domains = service.list_domains().await.unwrap();
        assert_eq!(domains[0].state, DomainState::Failed);
    }

    #[tokio::test]
    async fn removed_domain_disappears() {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        let service = service(&ds);

        let tx = service
            .add_domain("alpha", "simulated", vec!["docker".into()])
            .await
            .unwrap();
        let id: DomainId = wait_settled(&service.txs, &tx.id)
            .await
            .target
            .unwrap()
            .parse()
            .unwrap();

        let tx = service.remove_domain(&id).await.unwrap();
        let settled = wait_settled(&service.txs, &tx.id).await;
        assert_eq!(settled.state, TransactionState::Completed);
        assert!(service.list_domains().await.unwrap().is_empty());
    }
}
