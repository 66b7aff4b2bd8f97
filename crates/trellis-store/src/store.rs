//! Document store contract and the typed access layer over it.

use crate::error::{Result, StoreError};
use crate::query::{Query, SearchOptions, UpdateOptions};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// The persistent store seam.
///
/// Documents are JSON objects carrying at least an `id` field. Query
/// predicates, ordering/limit options and lock-token semantics are
/// described in [`crate::query`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Return every document of `table` matching `query`.
    async fn search(&self, table: &str, query: &Query, opts: SearchOptions) -> Result<Vec<Value>>;

    /// Insert one document; fails with `Conflict` on a duplicate id.
    async fn insert(&self, table: &str, doc: Value) -> Result<()>;

    /// Patch the top-level fields of every matching document, honoring
    /// lock/unlock options. Returns the number of documents updated.
    async fn update(
        &self,
        table: &str,
        query: &Query,
        patch: Value,
        opts: UpdateOptions,
    ) -> Result<u64>;

    /// Delete every matching document, returning the count removed.
    async fn delete(&self, table: &str, query: &Query) -> Result<u64>;
}

/// A record type persisted in one table of the store.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    /// Table this record kind lives in.
    const TABLE: &'static str;

    /// The record's id, serialized into the document's `id` field.
    fn record_id(&self) -> String;
}

/// Typed, cloneable handle over the raw document store.
#[derive(Clone)]
pub struct Datastore {
    inner: Arc<dyn Store>,
}

impl Datastore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self { inner }
    }

    /// The underlying raw store.
    pub fn raw(&self) -> &Arc<dyn Store> {
        &self.inner
    }

    /// Fetch one record by id.
    pub async fn get<R: Record>(&self, id: &str) -> Result<Option<R>> {
        let query = Query::all().eq("id", id);
        let mut rows = self
            .inner
            .search(R::TABLE, &query, SearchOptions::default().with_limit(1))
            .await?;
        match rows.pop() {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }

    /// Fetch one record by id, failing with `NotFound` when absent.
    pub async fn require<R: Record>(&self, id: &str) -> Result<R> {
        self.get::<R>(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{}/{id}", R::TABLE)))
    }

    /// Find every record matching `query`.
    pub async fn find<R: Record>(&self, query: &Query, opts: SearchOptions) -> Result<Vec<R>> {
        let rows = self.inner.search(R::TABLE, query, opts).await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(StoreError::from))
            .collect()
    }

    /// Find at most one record matching `query`.
    pub async fn find_one<R: Record>(&self, query: &Query) -> Result<Option<R>> {
        let mut rows = self
            .find::<R>(query, SearchOptions::default().with_limit(1))
            .await?;
        Ok(rows.pop())
    }

    /// Insert a record.
    pub async fn put<R: Record>(&self, record: &R) -> Result<()> {
        self.inner
            .insert(R::TABLE, serde_json::to_value(record)?)
            .await
    }

    /// Patch every record matching `query` with the given top-level
    /// fields, bumping `last`.
    pub async fn patch<R: Record>(
        &self,
        query: &Query,
        patch: Value,
        opts: UpdateOptions,
    ) -> Result<u64> {
        let patch = with_last_bumped(patch)?;
        self.inner.update(R::TABLE, query, patch, opts).await
    }

    /// Patch one record by id.
    pub async fn patch_id<R: Record>(&self, id: &str, patch: Value) -> Result<u64> {
        self.patch::<R>(
            &Query::all().eq("id", id),
            patch,
            UpdateOptions::default(),
        )
        .await
    }

    /// Replace a record wholesale (id taken from the record).
    pub async fn save<R: Record>(&self, record: &R) -> Result<u64> {
        let id = record.record_id();
        let patch = serde_json::to_value(record)?;
        self.patch::<R>(
            &Query::all().eq("id", id),
            patch,
            UpdateOptions::default(),
        )
        .await
    }

    /// Delete every record matching `query`.
    pub async fn remove<R: Record>(&self, query: &Query) -> Result<u64> {
        self.inner.delete(R::TABLE, query).await
    }

    /// Delete one record by id.
    pub async fn remove_id<R: Record>(&self, id: &str) -> Result<u64> {
        self.remove::<R>(&Query::all().eq("id", id)).await
    }
}

fn with_last_bumped(patch: Value) -> Result<Value> {
    let mut patch = match patch {
        Value::Object(map) => map,
        other => {
            return Err(StoreError::Backend(format!(
                "patch must be a JSON object, got {other}"
            )))
        }
    };
    patch
        .entry("last")
        .or_insert_with(|| serde_json::json!(chrono::Utc::now()));
    Ok(Value::Object(patch))
}
