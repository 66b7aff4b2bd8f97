//! Transaction bookkeeping.
//!
//! Every externally visible mutation runs under a transaction record so
//! clients can poll the outcome of work that finishes asynchronously.
//! `started` is the only non-terminal state; completing or aborting a
//! finished transaction is refused.

use crate::error::{Result, ServiceError};
use serde_json::json;
use trellis_store::{Datastore, Query, SearchOptions, SortOrder};
use trellis_types::{Transaction, TransactionId, TransactionState};

/// Creates and settles transaction records.
#[derive(Clone)]
pub struct TransactionService {
    ds: Datastore,
}

impl TransactionService {
    pub fn new(ds: Datastore) -> Self {
        Self { ds }
    }

    /// Open a new `started` transaction.
    pub async fn begin(&self, kind: &str, data: serde_json::Value) -> Result<Transaction> {
        let tx = Transaction::start(kind, data);
        self.ds.put(&tx).await?;
        tracing::debug!(tx = %tx.id, kind, "transaction started");
        Ok(tx)
    }

    /// Settle a transaction as `completed`, recording the target id.
    pub async fn complete(&self, id: &TransactionId, target: Option<String>) -> Result<()> {
        self.settle(
            id,
            json!({"state": TransactionState::Completed, "target": target}),
        )
        .await
    }

    /// Settle a transaction as `aborted`, recording the error.
    pub async fn abort(&self, id: &TransactionId, err: &str) -> Result<()> {
        tracing::warn!(tx = %id, err, "transaction aborted");
        self.settle(
            id,
            json!({"state": TransactionState::Aborted, "err": err}),
        )
        .await
    }

    async fn settle(&self, id: &TransactionId, patch: serde_json::Value) -> Result<()> {
        let tx = self.get(id).await?;
        if tx.state.is_terminal() {
            return Err(ServiceError::TransactionFinished(id.clone()));
        }
        self.ds
            .patch_id::<Transaction>(&id.to_string(), patch)
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: &TransactionId) -> Result<Transaction> {
        Ok(self.ds.require(&id.to_string()).await?)
    }

    /// Every transaction, most recent first.
    pub async fn list(&self) -> Result<Vec<Transaction>> {
        Ok(self
            .ds
            .find(
                &Query::all(),
                SearchOptions::ordered("ini", SortOrder::Descending),
            )
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use trellis_store::MemoryStore;

    #[tokio::test]
    async fn started_settles_exactly_once() {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        let txs = TransactionService::new(ds);

        let tx = txs.begin("add-instance", json!({})).await.unwrap();
        assert_eq!(tx.state, TransactionState::Started);

        txs.complete(&tx.id, Some("abc".into())).await.unwrap();
        let settled = txs.get(&tx.id).await.unwrap();
        assert_eq!(settled.state, TransactionState::Completed);
        assert_eq!(settled.target.as_deref(), Some("abc"));

        // Terminal states refuse further transitions.
        let again = txs.abort(&tx.id, "late").await;
        assert!(matches!(again, Err(ServiceError::TransactionFinished(_))));
    }

    #[tokio::test]
    async fn abort_records_the_error() {
        let ds = Datastore::new(Arc::new(MemoryStore::new()));
        let txs = TransactionService::new(ds);

        let tx = txs.begin("remove-instance", json!({})).await.unwrap();
        txs.abort(&tx.id, "instance missing").await.unwrap();

        let settled = txs.get(&tx.id).await.unwrap();
        assert_eq!(settled.state, TransactionState::Aborted);
        assert_eq!(settled.err.as_deref(), Some("instance missing"));
    }
}
