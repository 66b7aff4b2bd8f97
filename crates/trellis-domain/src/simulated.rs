//! The simulated driver.
//!
//! Keeps every resource in process memory and synthesizes addresses,
//! which is all the reconciliation daemons need for development and
//! testing. Failure injection flips specific operations into errors so
//! tests can exercise the failed-instance replacement path.

use crate::driver::DomainDriver;
use crate::error::{DriverError, Result};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use trellis_types::{Collection, Domain, Instance, Link};

/// Per-domain simulated backend state.
#[derive(Default)]
struct SimulatedDomain {
    collections: DashSet<String>,
    /// Instance id to synthesized address.
    instances: DashMap<String, String>,
    links: DashSet<String>,
}

/// In-memory driver for development and testing.
#[derive(Default)]
pub struct SimulatedDriver {
    domains: DashMap<String, SimulatedDomain>,

    /// Instance ids whose next `add_instance` fails.
    failing: DashSet<String>,

    /// Materialized instance ids reported as failed.
    dead: DashSet<String>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `add_instance` for `instance` fail.
    pub fn fail_instance(&self, instance: &Instance) {
        self.failing.insert(instance.id.to_string());
    }

    /// Report an already materialized instance as failed until it is
    /// removed.
    pub fn kill_instance(&self, instance: &Instance) {
        self.dead.insert(instance.id.to_string());
    }

    /// Number of live instances across every simulated domain.
    pub fn instance_count(&self) -> usize {
        self.domains
            .iter()
            .map(|entry| entry.value().instances.len())
            .sum()
    }

    /// Whether `collection` is present on `domain`.
    pub fn has_collection(&self, domain: &Domain, collection: &Collection) -> bool {
        self.domains
            .get(&domain.id.to_string())
            .map(|d| d.collections.contains(&collection.id.to_string()))
            .unwrap_or(false)
    }

    /// Whether `link` is wired on `domain`.
    pub fn has_link(&self, domain: &Domain, link: &Link) -> bool {
        self.domains
            .get(&domain.id.to_string())
            .map(|d| d.links.contains(&link.id.to_string()))
            .unwrap_or(false)
    }

    fn domain_state(
        &self,
        domain: &Domain,
    ) -> Result<dashmap::mapref::one::Ref<'_, String, SimulatedDomain>> {
        self.domains
            .get(&domain.id.to_string())
            .ok_or_else(|| DriverError::Unreachable(format!("domain {} not added", domain.name)))
    }
}

#[async_trait]
impl DomainDriver for SimulatedDriver {
    async fn add_domain(&self, domain: &Domain) -> Result<()> {
        self.domains
            .entry(domain.id.to_string())
            .or_default();
        tracing::debug!(domain = %domain.name, "simulated domain added");
        Ok(())
    }

    async fn remove_domain(&self, domain: &Domain) -> Result<()> {
        self.domains.remove(&domain.id.to_string());
        Ok(())
    }

    async fn list_domains(&self) -> Result<Vec<String>> {
        Ok(self.domains.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn add_collection(&self, domain: &Domain, collection: &Collection) -> Result<()> {
        let state = self.domain_state(domain)?;
        state.collections.insert(collection.id.to_string());
        Ok(())
    }

    async fn remove_collection(&self, domain: &Domain, collection: &Collection) -> Result<()> {
        if let Some(state) = self.domains.get(&domain.id.to_string()) {
            state.collections.remove(&collection.id.to_string());
        }
        Ok(())
    }

    async fn add_instance(
        &self,
        domain: &Domain,
        collection: &Collection,
        instance: &Instance,
    ) -> Result<String> {
        if self.failing.remove(&instance.id.to_string()).is_some() {
            return Err(DriverError::Failed(format!(
                "injected failure for instance {}",
                instance.id
            )));
        }
        let state = self.domain_state(domain)?;
        if !state.collections.contains(&collection.id.to_string()) {
            return Err(DriverError::Failed(format!(
                "collection {} not present on domain {}",
                collection.id, domain.name
            )));
        }
        let addr = format!("sim://{}/{}", domain.name, instance.id);
        state.instances.insert(instance.id.to_string(), addr.clone());
        Ok(addr)
    }

    async fn remove_instance(&self, domain: &Domain, instance: &Instance) -> Result<()> {
        if let Some(state) = self.domains.get(&domain.id.to_string()) {
            state.instances.remove(&instance.id.to_string());
        }
        self.dead.remove(&instance.id.to_string());
        Ok(())
    }

    async fn failed_instances(&self, domain: &Domain) -> Result<Vec<String>> {
        let state = self.domain_state(domain)?;
        Ok(state
            .instances
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|id| self.dead.contains(id))
            .collect())
    }

    async fn add_link(&self, domain: &Domain, link: &Link) -> Result<()> {
        let state = self.domain_state(domain)?;
        state.links.insert(link.id.to_string());
        Ok(())
    }

    async fn remove_link(&self, domain: &Domain, link: &Link) -> Result<()> {
        if let Some(state) = self.domains.get(&domain.id.to_string()) {
            state.links.remove(&link.id.to_string());
        }
        Ok(())
    }

    async fn event_instance(
        &self,
        domain: &Domain,
        instance: &Instance,
        event: &str,
    ) -> Result<()> {
        let state = self.domain_state(domain)?;
        if !state.instances.contains_key(&instance.id.to_string()) {
            return Err(DriverError::Failed(format!(
                "instance {} not present on domain {}",
                instance.id, domain.name
            )));
        }
        tracing::debug!(domain = %domain.name, instance = %instance.id, event, "simulated instance event");
        Ok(())
    }

    async fn event_collection(
        &self,
        domain: &Domain,
        collection: &Collection,
        event: &str,
    ) -> Result<()> {
        let state = self.domain_state(domain)?;
        if !state.collections.contains(&collection.id.to_string()) {
            return Err(DriverError::Failed(format!(
                "collection {} not present on domain {}",
                collection.id, domain.name
            )));
        }
        tracing::debug!(domain = %domain.name, collection = %collection.id, event, "simulated collection event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use trellis_types::{BasicModel, DomainState, Durability, InstanceId, SlotName};

    fn fixtures() -> (Domain, Collection, Instance) {
        let mut domain = Domain::new("alpha", "simulated", vec!["docker".into()]);
        domain.state = DomainState::Ready;

        let backing = BasicModel {
            runtime: "docker".into(),
            source: "app:1".into(),
            durability: Durability::Ephemeral,
            endpoints: BTreeMap::new(),
            variables: BTreeMap::new(),
            volumes: BTreeMap::new(),
            events: Vec::new(),
        };
        let collection = Collection::for_slot(
            InstanceId::generate(),
            SlotName::Subcomponent("web".into()),
            &backing,
            Vec::new(),
        );
        let instance = Instance::basic(
            collection.parent.clone(),
            collection.name.clone(),
            collection.id.clone(),
            Some(domain.id.clone()),
        );
        (domain, collection, instance)
    }

    #[tokio::test]
    async fn instance_lifecycle_roundtrip() {
        let driver = SimulatedDriver::new();
        let (domain, collection, instance) = fixtures();

        driver.add_domain(&domain).await.unwrap();
        driver.add_collection(&domain, &collection).await.unwrap();

        let addr = driver
            .add_instance(&domain, &collection, &instance)
            .await
            .unwrap();
        assert!(addr.starts_with("sim://alpha/"));
        assert_eq!(driver.instance_count(), 1);

        driver.remove_instance(&domain, &instance).await.unwrap();
        assert_eq!(driver.instance_count(), 0);
        // Removal of something already gone stays quiet.
        driver.remove_instance(&domain, &instance).await.unwrap();
    }

    #[tokio::test]
    async fn add_instance_requires_its_collection() {
        let driver = SimulatedDriver::new();
        let (domain, collection, instance) = fixtures();
        driver.add_domain(&domain).await.unwrap();

        let result = driver.add_instance(&domain, &collection, &instance).await;
        assert!(matches!(result, Err(DriverError::Failed(_))));
    }

    #[tokio::test]
    async fn killed_instance_is_reported_until_removed() {
        let driver = SimulatedDriver::new();
        let (domain, collection, instance) = fixtures();
        driver.add_domain(&domain).await.unwrap();
        driver.add_collection(&domain, &collection).await.unwrap();
        driver
            .add_instance(&domain, &collection, &instance)
            .await
            .unwrap();

        assert!(driver.failed_instances(&domain).await.unwrap().is_empty());
        driver.kill_instance(&instance);
        assert_eq!(
            driver.failed_instances(&domain).await.unwrap(),
            vec![instance.id.to_string()]
        );

        driver.remove_instance(&domain, &instance).await.unwrap();
        assert!(driver.failed_instances(&domain).await.unwrap().is_empty());

        assert_eq!(
            driver.list_domains().await.unwrap(),
            vec![domain.id.to_string()]
        );
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let driver = SimulatedDriver::new();
        let (domain, collection, instance) = fixtures();
        driver.add_domain(&domain).await.unwrap();
        driver.add_collection(&domain, &collection).await.unwrap();

        driver.fail_instance(&instance);
        assert!(driver
            .add_instance(&domain, &collection, &instance)
            .await
            .is_err());
        assert!(driver
            .add_instance(&domain, &collection, &instance)
            .await
            .is_ok());
    }
}
