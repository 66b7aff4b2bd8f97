//! Collection records.
//!
//! A collection is the slot occupied by one subcomponent or connector
//! inside one composite instance; its identity is `(parent, name)` and
//! exactly one collection exists per pair. The `members` list is the
//! only compound field mutated concurrently and is edited under the
//! advisory `lock` token.

use crate::ids::{CollectionId, InstanceId};
use crate::instance::SlotName;
use crate::model::{BasicModel, Direction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Collection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionState {
    /// Created by the tree builder, not yet populated.
    Preinit,
    /// Populated, not yet present on its domains.
    Init,
    /// Present on every target domain.
    Ready,
    /// Flagged for removal.
    Destroy,
}

/// The live set of instances realizing one slot of one composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,

    /// Owning composite instance.
    pub parent: InstanceId,

    /// Slot name; unique within the parent.
    pub name: SlotName,

    /// In-endpoint name to protocol, derived from the backing type.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,

    /// Out-endpoint name to protocol, derived from the backing type.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,

    /// Basic instance ids currently realizing this slot, in insertion
    /// order. Mutated only under `lock`.
    #[serde(default)]
    pub members: Vec<InstanceId>,

    /// Placement constraint: domain names this collection may live on.
    /// Empty means every ready domain.
    #[serde(default)]
    pub domains: Vec<String>,

    pub state: CollectionState,

    /// Advisory lock token; set atomically by a conditional update.
    #[serde(default)]
    pub lock: Option<String>,

    /// Last observed average CPU utilization across members, 0.0..1.0.
    #[serde(default)]
    pub cpu: Option<f64>,

    pub created_at: chrono::DateTime<chrono::Utc>,

    pub last: chrono::DateTime<chrono::Utc>,
}

impl Collection {
    /// A fresh `preinit` collection for `slot` of `parent`, with
    /// endpoint maps derived from the backing basic type.
    pub fn for_slot(
        parent: InstanceId,
        slot: SlotName,
        backing: &BasicModel,
        domains: Vec<String>,
    ) -> Self {
        let mut inputs = BTreeMap::new();
        let mut outputs = BTreeMap::new();
        for (name, endpoint) in &backing.endpoints {
            match endpoint.direction {
                Direction::In => {
                    inputs.insert(name.clone(), endpoint.protocol.clone());
                }
                Direction::Out => {
                    outputs.insert(name.clone(), endpoint.protocol.clone());
                }
            }
        }

        let now = chrono::Utc::now();
        Self {
            id: CollectionId::generate(),
            parent,
            name: slot,
            inputs,
            outputs,
            members: Vec::new(),
            domains,
            state: CollectionState::Preinit,
            lock: None,
            cpu: None,
            created_at: now,
            last: now,
        }
    }
}
