//! In-memory store implementation
//!
//! Suitable for development and testing. Backends for real document
//! stores implement the same [`Store`] trait.

use crate::error::{Result, StoreError};
use crate::query::{Query, SearchOptions, SortOrder, UpdateOptions};
use crate::store::Store;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// In-memory document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn doc_id(doc: &Value) -> Result<String> {
    doc.get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StoreError::Backend("document has no string id field".into()))
}

fn apply_patch(doc: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(fields)) = (doc, patch) {
        for (key, value) in fields {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn compare_field(a: &Value, b: &Value, field: &str) -> std::cmp::Ordering {
    let a = a.get(field).unwrap_or(&Value::Null);
    let b = b.get(field).unwrap_or(&Value::Null);
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(std::cmp::Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => std::cmp::Ordering::Equal,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn search(&self, table: &str, query: &Query, opts: SearchOptions) -> Result<Vec<Value>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Value> = tables
            .get(table)
            .map(|rows| rows.values().filter(|doc| query.matches(doc)).cloned().collect())
            .unwrap_or_default();

        if let Some((field, order)) = &opts.order_by {
            rows.sort_by(|a, b| {
                let ordering = compare_field(a, b, field);
                match order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }
        if let Some(limit) = opts.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, doc: Value) -> Result<()> {
        let id = doc_id(&doc)?;
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();
        if rows.contains_key(&id) {
            return Err(StoreError::Conflict(format!("{table}/{id} already exists")));
        }
        rows.insert(id, doc);
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        query: &Query,
        patch: Value,
        opts: UpdateOptions,
    ) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };

        let mut updated = 0;
        for doc in rows.values_mut() {
            if !query.matches(doc) {
                continue;
            }

            // Conditional token semantics: acquisition only succeeds on
            // unlocked documents, release only where the token matches.
            if let Some(token) = &opts.lock {
                let current = doc.get("lock").unwrap_or(&Value::Null);
                if !current.is_null() {
                    continue;
                }
                apply_patch(doc, &patch);
                apply_patch(doc, &serde_json::json!({ "lock": token }));
                updated += 1;
                continue;
            }
            if let Some(token) = &opts.unlock {
                let current = doc.get("lock").unwrap_or(&Value::Null);
                if current.as_str() != Some(token.as_str()) {
                    continue;
                }
                apply_patch(doc, &patch);
                apply_patch(doc, &serde_json::json!({ "lock": null }));
                updated += 1;
                continue;
            }

            apply_patch(doc, &patch);
            updated += 1;
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, query: &Query) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|_, doc| !query.matches(doc));
        Ok((before - rows.len()) as u64)
    }
}
