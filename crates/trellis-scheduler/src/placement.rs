//! Domain placement for basic instance additions.
//!
//! Among eligible domains (required runtime, optional allow-list),
//! replicas are spread least-loaded-first with ties broken by list
//! order. Spreading is deterministic once the eligible set is fixed;
//! nothing about placement is random.

use crate::error::Result;
use std::collections::HashMap;
use trellis_store::{Datastore, Query, SearchOptions, SortOrder};
use trellis_types::{Domain, DomainId, DomainState, Instance};

/// Chooses domains for a batch of additions to one slot.
pub struct Placement {
    eligible: Vec<Domain>,
    load: HashMap<DomainId, usize>,
}

impl Placement {
    /// Build the eligible set for `runtime` under `allow` (empty allow
    /// list means every ready domain), preloading current per-domain
    /// member counts from `members`.
    pub async fn prepare(
        ds: &Datastore,
        runtime: &str,
        allow: &[String],
        members: &[Instance],
    ) -> Result<Self> {
        let domains: Vec<Domain> = ds
            .find(
                &Query::all().eq("state", DomainState::Ready),
                SearchOptions::ordered("name", SortOrder::Ascending),
            )
            .await?;

        let eligible: Vec<Domain> = domains
            .into_iter()
            .filter(|domain| domain.supports_runtime(runtime))
            .filter(|domain| allow.is_empty() || allow.iter().any(|name| name == &domain.name))
            .collect();

        let mut load: HashMap<DomainId, usize> = HashMap::new();
        for member in members {
            if let Some(domain) = &member.domain {
                *load.entry(domain.clone()).or_default() += 1;
            }
        }

        Ok(Self { eligible, load })
    }

    pub fn has_candidates(&self) -> bool {
        !self.eligible.is_empty()
    }

    /// Pick the least-loaded eligible domain and account for the pick,
    /// so consecutive calls within one batch keep spreading evenly.
    pub fn next(&mut self) -> Option<DomainId> {
        let chosen = self
            .eligible
            .iter()
            .min_by_key(|domain| self.load.get(&domain.id).copied().unwrap_or(0))?
            .id
            .clone();
        *self.load.entry(chosen.clone()).or_default() += 1;
        Some(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use trellis_store::MemoryStore;

    async fn seed_domains(ds: &Datastore, names: &[&str]) -> Vec<DomainId> {
        let mut ids = Vec::new();
        for name in names {
            let mut domain = Domain::new(*name, "simulated", vec!["docker".into()]);
            domain.state = DomainState::Ready;
            ids.push(domain.id.clone());
            ds.put(&domain).await.unwrap();
        }
        ids
    }

    #[tokio::test]
    async fn spreads_least_loaded_first_with_stable_ties() {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        let ids = seed_domains(&ds, &["alpha", "beta"]).await;

        let mut placement = Placement::prepare(&ds, "docker", &[], &[]).await.unwrap();
        // Ties break toward "alpha" (list order), then alternate.
        assert_eq!(placement.next(), Some(ids[0].clone()));
        assert_eq!(placement.next(), Some(ids[1].clone()));
        assert_eq!(placement.next(), Some(ids[0].clone()));
    }

    #[tokio::test]
    async fn allow_list_and_runtime_filter_domains() {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        seed_domains(&ds, &["alpha", "beta"]).await;
        let mut vm_domain = Domain::new("gamma", "simulated", vec!["vm".into()]);
        vm_domain.state = DomainState::Ready;
        ds.put(&vm_domain).await.unwrap();

        let placement = Placement::prepare(&ds, "vm", &[], &[]).await.unwrap();
        assert!(placement.has_candidates());

        let restricted =
            Placement::prepare(&ds, "docker", &["beta".to_string()], &[])
                .await
                .unwrap();
        assert_eq!(restricted.eligible.len(), 1);
        assert_eq!(restricted.eligible[0].name, "beta");
    }
}
