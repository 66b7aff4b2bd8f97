//! Scheduling events.
//!
//! The scheduler is a pure decision function: it never mutates state,
//! it emits events that the tree builder and the schedule daemon apply.

use crate::ids::{DomainId, InstanceId};
use crate::instance::SlotName;
use serde::{Deserialize, Serialize};

/// Kind of scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingEventKind {
    InstanceAdd,
    InstanceRemove,
}

/// One scaling decision for one slot of one composite instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingEvent {
    pub kind: SchedulingEventKind,

    /// Composite instance owning the slot.
    pub parent: InstanceId,

    pub slot: SlotName,

    /// Victim, set on `InstanceRemove`.
    #[serde(default)]
    pub instance: Option<InstanceId>,

    /// Chosen placement, set on basic `InstanceAdd`.
    #[serde(default)]
    pub domain: Option<DomainId>,
}

impl SchedulingEvent {
    pub fn add(parent: InstanceId, slot: SlotName, domain: Option<DomainId>) -> Self {
        Self {
            kind: SchedulingEventKind::InstanceAdd,
            parent,
            slot,
            instance: None,
            domain,
        }
    }

    pub fn remove(parent: InstanceId, slot: SlotName, victim: InstanceId) -> Self {
        Self {
            kind: SchedulingEventKind::InstanceRemove,
            parent,
            slot,
            instance: Some(victim),
            domain: None,
        }
    }
}
