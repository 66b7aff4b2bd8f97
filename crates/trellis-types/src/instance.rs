//! Instance records.
//!
//! Composite instances are created by the tree builder, basic instances
//! by scheduler-driven instantiation, proxy instances by the projection
//! daemon. Destruction is always two-phase: an instance is flagged
//! `destroy` and reaped later, once its domain resource and collection
//! membership have been unwound.

use crate::ids::{CollectionId, DomainId, InstanceId};
use crate::model::Model;
use serde::{Deserialize, Serialize};

/// Kind of instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    Basic,
    Composite,
}

/// Instance lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Created, not yet materialized on a domain.
    Init,
    /// Materialized and addressable.
    Ready,
    /// A domain operation on it failed; reconciliation will replace it.
    Failed,
    /// Flagged for removal; reaped once fully unwound.
    Destroy,
}

/// The name under which an instance or collection exists in its parent
/// composite. A slot is either a subcomponent or a connector, never
/// both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotName {
    Subcomponent(String),
    Connector(String),
}

impl SlotName {
    pub fn name(&self) -> &str {
        match self {
            SlotName::Subcomponent(name) => name,
            SlotName::Connector(name) => name,
        }
    }
}

impl std::fmt::Display for SlotName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotName::Subcomponent(name) => write!(f, "subcomponent/{name}"),
            SlotName::Connector(name) => write!(f, "connector/{name}"),
        }
    }
}

/// A live instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,

    pub kind: InstanceKind,

    /// Owning composite instance; `None` for a root.
    pub parent: Option<InstanceId>,

    /// Slot this instance realizes in its parent; `None` for a root.
    pub slot: Option<SlotName>,

    #[serde(default)]
    pub labels: Vec<String>,

    /// Resolved model. Always present on composites; basic instances
    /// carry none (their type is reachable through the parent model).
    #[serde(default)]
    pub model: Option<Model>,

    /// Owning collection, basic instances only.
    #[serde(default)]
    pub collection: Option<CollectionId>,

    /// Hosting domain, assigned at placement time.
    #[serde(default)]
    pub domain: Option<DomainId>,

    /// Address reported by the domain driver once materialized.
    #[serde(default)]
    pub addr: Option<String>,

    /// Real member this row mirrors; set only on proxy instances.
    #[serde(default)]
    pub proxy_of: Option<InstanceId>,

    pub state: InstanceState,

    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Last touch, used as a recency-based work queue by the daemons.
    pub last: chrono::DateTime<chrono::Utc>,
}

impl Instance {
    /// A new root or nested composite instance in `init` state.
    pub fn composite(
        parent: Option<InstanceId>,
        slot: Option<SlotName>,
        model: Model,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: InstanceId::generate(),
            kind: InstanceKind::Composite,
            parent,
            slot,
            labels: Vec::new(),
            model: Some(model),
            collection: None,
            domain: None,
            addr: None,
            proxy_of: None,
            state: InstanceState::Init,
            created_at: now,
            last: now,
        }
    }

    /// A new basic member instance in `init` state.
    pub fn basic(
        parent: InstanceId,
        slot: SlotName,
        collection: CollectionId,
        domain: Option<DomainId>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: InstanceId::generate(),
            kind: InstanceKind::Basic,
            parent: Some(parent),
            slot: Some(slot),
            labels: Vec::new(),
            model: None,
            collection: Some(collection),
            domain,
            addr: None,
            proxy_of: None,
            state: InstanceState::Init,
            created_at: now,
            last: now,
        }
    }

    /// A proxy mirror of `original` on another domain.
    pub fn proxy_of(original: &Instance, domain: DomainId) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: InstanceId::generate(),
            kind: InstanceKind::Basic,
            parent: original.parent.clone(),
            slot: original.slot.clone(),
            labels: original.labels.clone(),
            model: None,
            collection: original.collection.clone(),
            domain: Some(domain),
            addr: original.addr.clone(),
            proxy_of: Some(original.id.clone()),
            state: InstanceState::Init,
            created_at: now,
            last: now,
        }
    }

    pub fn is_proxy(&self) -> bool {
        self.proxy_of.is_some()
    }

    /// Whether this instance counts as live for cardinality purposes.
    pub fn is_live(&self) -> bool {
        matches!(self.state, InstanceState::Init | InstanceState::Ready)
    }
}
