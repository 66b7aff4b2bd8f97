//! Transaction records.
//!
//! A simple state machine used to report asynchronous operation
//! outcomes: `started` may transition to `completed` or `aborted`, both
//! terminal. A client polling a transaction observes the final state
//! with either a target id or a serialized error; there is no
//! partial-success signal.

use crate::ids::TransactionId;
use serde::{Deserialize, Serialize};

/// Transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Started,
    Completed,
    Aborted,
}

impl TransactionState {
    /// Terminal states are final; only `started` may transition.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionState::Started)
    }
}

/// An asynchronous operation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,

    /// Operation kind, e.g. `add-instance`.
    pub kind: String,

    /// Id of the entity the operation produced or acted on.
    #[serde(default)]
    pub target: Option<String>,

    /// Caller-supplied request payload.
    #[serde(default)]
    pub data: serde_json::Value,

    pub state: TransactionState,

    /// Serialized error, set on abort.
    #[serde(default)]
    pub err: Option<String>,

    pub ini: chrono::DateTime<chrono::Utc>,

    pub last: chrono::DateTime<chrono::Utc>,
}

impl Transaction {
    pub fn start(kind: impl Into<String>, data: serde_json::Value) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: TransactionId::generate(),
            kind: kind.into(),
            target: None,
            data,
            state: TransactionState::Started,
            err: None,
            ini: now,
            last: now,
        }
    }
}
