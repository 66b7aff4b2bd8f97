//! Domain records.
//!
//! A domain is an independently managed execution environment capable
//! of hosting instances of certain runtimes. The `driver` string names
//! the registered driver implementation that translates abstract
//! collections, instances and links into concrete backend resources.

use crate::ids::DomainId;
use serde::{Deserialize, Serialize};

/// Domain lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainState {
    Init,
    Ready,
    Failed,
    Destroy,
}

/// An execution domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,

    /// Human-facing name, referenced by placement constraints.
    pub name: String,

    /// Driver type string this domain dispatches to.
    pub driver: String,

    /// Runtimes this domain can host.
    #[serde(default)]
    pub runtimes: Vec<String>,

    #[serde(default)]
    pub labels: Vec<String>,

    pub state: DomainState,

    pub created_at: chrono::DateTime<chrono::Utc>,

    pub last: chrono::DateTime<chrono::Utc>,
}

impl Domain {
    pub fn new(
        name: impl Into<String>,
        driver: impl Into<String>,
        runtimes: Vec<String>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: DomainId::generate(),
            name: name.into(),
            driver: driver.into(),
            runtimes,
            labels: Vec::new(),
            state: DomainState::Init,
            created_at: now,
            last: now,
        }
    }

    /// Whether this domain can host the given runtime.
    pub fn supports_runtime(&self, runtime: &str) -> bool {
        self.runtimes.iter().any(|r| r.eq_ignore_ascii_case(runtime))
    }
}
