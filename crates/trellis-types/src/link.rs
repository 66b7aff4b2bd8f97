//! Link records.
//!
//! Links are derived, never authored: they exist only because the
//! adjacency resolver found a path between two collections' endpoints.
//! They are recomputed, not edited. No two links may share the same
//! `(src, src_name, dst, dst_name)` tuple.

use crate::ids::{CollectionId, LinkId};
use serde::{Deserialize, Serialize};

/// Link lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Recorded, not yet wired on the domains.
    Init,
    /// Wired on every relevant domain.
    Ready,
    /// Flagged for removal.
    Destroy,
}

/// A materialized directed connection between two collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,

    pub protocol: String,

    /// Source collection.
    pub src: CollectionId,

    /// Endpoint name on the source collection.
    pub src_name: String,

    /// Destination collection.
    pub dst: CollectionId,

    /// Endpoint name on the destination collection.
    pub dst_name: String,

    pub state: LinkState,
}

impl Link {
    pub fn new(
        protocol: impl Into<String>,
        src: CollectionId,
        src_name: impl Into<String>,
        dst: CollectionId,
        dst_name: impl Into<String>,
    ) -> Self {
        Self {
            id: LinkId::generate(),
            protocol: protocol.into(),
            src,
            src_name: src_name.into(),
            dst,
            dst_name: dst_name.into(),
            state: LinkState::Init,
        }
    }

    /// The identity tuple links are deduplicated on.
    pub fn key(&self) -> (CollectionId, &str, CollectionId, &str) {
        (
            self.src.clone(),
            self.src_name.as_str(),
            self.dst.clone(),
            self.dst_name.as_str(),
        )
    }
}
