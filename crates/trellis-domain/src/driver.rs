//! The domain driver contract.
//!
//! A driver translates abstract collections, instances and links into
//! concrete resources of one backend kind. Every operation must be
//! idempotent: the reconciliation daemons re-run passes after partial
//! failures and a repeated add or remove of the same resource must
//! succeed without side effects.

use crate::error::Result;
use async_trait::async_trait;
use trellis_types::{Collection, Domain, Instance, Link};

/// Backend operations one driver kind implements.
#[async_trait]
pub trait DomainDriver: Send + Sync {
    /// Prepare backend state for a newly registered domain.
    async fn add_domain(&self, domain: &Domain) -> Result<()>;

    /// Tear down every backend resource of the domain.
    async fn remove_domain(&self, domain: &Domain) -> Result<()>;

    /// Ids of every domain this driver currently backs.
    async fn list_domains(&self) -> Result<Vec<String>>;

    /// Create the backend representation of a collection on a domain.
    async fn add_collection(&self, domain: &Domain, collection: &Collection) -> Result<()>;

    async fn remove_collection(&self, domain: &Domain, collection: &Collection) -> Result<()>;

    /// Materialize one member instance, returning its address.
    async fn add_instance(
        &self,
        domain: &Domain,
        collection: &Collection,
        instance: &Instance,
    ) -> Result<String>;

    async fn remove_instance(&self, domain: &Domain, instance: &Instance) -> Result<()>;

    /// Ids of instances the domain currently reports as failed.
    async fn failed_instances(&self, domain: &Domain) -> Result<Vec<String>>;

    /// Wire one link between two collections present on the domain.
    async fn add_link(&self, domain: &Domain, link: &Link) -> Result<()>;

    async fn remove_link(&self, domain: &Domain, link: &Link) -> Result<()>;

    /// Deliver a lifecycle event to one instance.
    async fn event_instance(
        &self,
        domain: &Domain,
        instance: &Instance,
        event: &str,
    ) -> Result<()>;

    /// Deliver a lifecycle event to every member of a collection.
    async fn event_collection(
        &self,
        domain: &Domain,
        collection: &Collection,
        event: &str,
    ) -> Result<()>;
}
