//! Table bindings for the engine's record types.

use crate::store::Record;
use trellis_types::{Collection, Domain, Instance, Link, Transaction};

impl Record for Instance {
    const TABLE: &'static str = "instances";

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}

impl Record for Collection {
    const TABLE: &'static str = "collections";

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}

impl Record for Link {
    const TABLE: &'static str = "links";

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}

impl Record for Domain {
    const TABLE: &'static str = "domains";

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}

impl Record for Transaction {
    const TABLE: &'static str = "transactions";

    fn record_id(&self) -> String {
        self.id.to_string()
    }
}
