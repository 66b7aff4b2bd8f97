//! Collection-level advisory locking.
//!
//! A collection's `members` list is the only compound field with
//! concurrent read-modify-write writers, so every mutator acquires the
//! advisory token first. Acquisition is a conditional update (set the
//! token only where unset); contenders retry under a bounded policy.

use crate::error::{Result, StoreError};
use crate::query::{Query, UpdateOptions};
use crate::retry::{retry_until, RetryPolicy};
use crate::store::{Datastore, Record};
use serde_json::json;
use trellis_types::{Collection, CollectionId, InstanceId};

/// Guard over a locked collection. Mutate [`CollectionGuard::members`],
/// then call [`CollectionGuard::commit`]; dropping without committing
/// releases the lock without writing members back.
pub struct CollectionGuard {
    ds: Datastore,
    id: CollectionId,
    token: String,

    /// Fresh snapshot read after acquisition.
    pub collection: Collection,
}

impl CollectionGuard {
    /// Acquire the lock on `id`, retrying under `policy`.
    pub async fn acquire(
        ds: &Datastore,
        id: &CollectionId,
        policy: &RetryPolicy,
    ) -> Result<CollectionGuard> {
        let token = uuid::Uuid::new_v4().to_string();
        let query = Query::all().eq("id", id.to_string());

        let acquired = retry_until(policy, "collection-lock", || {
            let ds = ds.clone();
            let query = query.clone();
            let token = token.clone();
            async move {
                let n = ds
                    .raw()
                    .update(
                        Collection::TABLE,
                        &query,
                        json!({}),
                        UpdateOptions::acquire(token),
                    )
                    .await?;
                Ok(if n == 1 { Some(()) } else { None })
            }
        })
        .await;

        match acquired {
            Ok(()) => {}
            Err(StoreError::LoopTimeout(_)) => {
                return Err(StoreError::LockTimeout(id.to_string()))
            }
            Err(err) => return Err(err),
        }

        let collection = match ds.require::<Collection>(&id.to_string()).await {
            Ok(collection) => collection,
            Err(err) => {
                // The row vanished between acquisition and read.
                let _ = ds
                    .raw()
                    .update(
                        Collection::TABLE,
                        &query,
                        json!({}),
                        UpdateOptions::release(token.clone()),
                    )
                    .await;
                return Err(err);
            }
        };

        Ok(CollectionGuard {
            ds: ds.clone(),
            id: id.clone(),
            token,
            collection,
        })
    }

    /// Append a member id if not already present.
    pub fn add_member(&mut self, member: InstanceId) {
        if !self.collection.members.contains(&member) {
            self.collection.members.push(member);
        }
    }

    /// Drop a member id.
    pub fn remove_member(&mut self, member: &InstanceId) {
        self.collection.members.retain(|m| m != member);
    }

    /// Write the members list (and state) back and release the token in
    /// one update.
    pub async fn commit(self) -> Result<()> {
        let query = Query::all().eq("id", self.id.to_string());
        let patch = json!({
            "members": self.collection.members,
            "state": self.collection.state,
            "last": chrono::Utc::now(),
        });
        let n = self
            .ds
            .raw()
            .update(
                Collection::TABLE,
                &query,
                patch,
                UpdateOptions::release(self.token.clone()),
            )
            .await?;
        if n != 1 {
            return Err(StoreError::Conflict(format!(
                "collection {} lock lost before commit",
                self.id
            )));
        }
        Ok(())
    }

    /// Release without writing members back.
    pub async fn release(self) -> Result<()> {
        let query = Query::all().eq("id", self.id.to_string());
        self.ds
            .raw()
            .update(
                Collection::TABLE,
                &query,
                json!({}),
                UpdateOptions::release(self.token.clone()),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use trellis_types::{BasicModel, Durability, SlotName};

    fn test_collection() -> Collection {
        let backing = BasicModel {
            runtime: "docker".into(),
            source: "app:1".into(),
            durability: Durability::Ephemeral,
            endpoints: BTreeMap::new(),
            variables: BTreeMap::new(),
            volumes: BTreeMap::new(),
            events: Vec::new(),
        };
        Collection::for_slot(
            trellis_types::InstanceId::generate(),
            SlotName::Subcomponent("web".into()),
            &backing,
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn members_mutation_roundtrips_under_lock() {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        let collection = test_collection();
        ds.put(&collection).await.unwrap();

        let member = InstanceId::generate();
        let mut guard = CollectionGuard::acquire(&ds, &collection.id, &RetryPolicy::fast())
            .await
            .unwrap();
        guard.add_member(member.clone());
        guard.commit().await.unwrap();

        let reloaded: Collection = ds.require(&collection.id.to_string()).await.unwrap();
        assert_eq!(reloaded.members, vec![member]);
        assert!(reloaded.lock.is_none());
    }

    #[tokio::test]
    async fn contended_lock_times_out() {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        let collection = test_collection();
        ds.put(&collection).await.unwrap();

        let holder = CollectionGuard::acquire(&ds, &collection.id, &RetryPolicy::fast())
            .await
            .unwrap();

        let contender = CollectionGuard::acquire(
            &ds,
            &collection.id,
            &RetryPolicy {
                interval: std::time::Duration::from_millis(1),
                max_attempts: 3,
                max_elapsed: std::time::Duration::from_secs(1),
            },
        )
        .await;
        assert!(matches!(contender, Err(StoreError::LockTimeout(_))));

        holder.release().await.unwrap();
        CollectionGuard::acquire(&ds, &collection.id, &RetryPolicy::fast())
            .await
            .unwrap();
    }
}
