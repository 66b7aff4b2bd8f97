//! Driver registry.

use crate::driver::DomainDriver;
use crate::error::{DriverError, Result};
use dashmap::DashMap;
use std::sync::Arc;
use trellis_types::Domain;

/// Maps driver type strings to registered driver implementations.
///
/// Domains carry a `driver` string; every backend touch resolves it
/// here first.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: DashMap<String, Arc<dyn DomainDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under its type string, replacing any previous
    /// registration.
    pub fn register(&self, kind: impl Into<String>, driver: Arc<dyn DomainDriver>) {
        let kind = kind.into();
        tracing::info!(%kind, "registered domain driver");
        self.drivers.insert(kind, driver);
    }

    /// Look up a driver by type string.
    pub fn get(&self, kind: &str) -> Result<Arc<dyn DomainDriver>> {
        self.drivers
            .get(kind)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DriverError::UnknownDriver(kind.to_string()))
    }

    /// The driver a domain dispatches to.
    pub fn for_domain(&self, domain: &Domain) -> Result<Arc<dyn DomainDriver>> {
        self.get(&domain.driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedDriver;

    #[test]
    fn unknown_driver_is_an_error() {
        let registry = DriverRegistry::new();
        assert!(matches!(
            registry.get("simulated"),
            Err(DriverError::UnknownDriver(_))
        ));

        registry.register("simulated", Arc::new(SimulatedDriver::new()));
        assert!(registry.get("simulated").is_ok());
    }
}
