//! Newtype identifiers for every record kind.
//!
//! Parent/child and collection/member relationships are expressed as
//! id-based back-references, never owning pointers: a composite owns its
//! collections, a collection owns its member ids, and everything else is
//! a lookup.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random id.
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

define_id!(
    /// Identifier of an instance (composite, basic or proxy).
    InstanceId
);
define_id!(
    /// Identifier of a collection, the slot of one subcomponent or
    /// connector inside one composite instance.
    CollectionId
);
define_id!(
    /// Identifier of a materialized link between two collections.
    LinkId
);
define_id!(
    /// Identifier of an execution domain.
    DomainId
);
define_id!(
    /// Identifier of an asynchronous transaction.
    TransactionId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrips_through_display() {
        let id = InstanceId::generate();
        let parsed: InstanceId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn id_serializes_transparently() {
        let id = CollectionId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
