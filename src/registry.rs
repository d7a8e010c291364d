//! Named native drivers, built by application startup code.

use crate::driver::Driver;
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Registry of native drivers that a gateway can be built from.
#[derive(Default, Clone)]
pub struct DriverRegistry {
    drivers: Arc<DashMap<String, Arc<dyn Driver>>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `driver` under `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, driver: Arc<dyn Driver>) -> &Self {
        let name = name.into();
        info!(driver = %name, "registered native driver");
        self.drivers.insert(name, driver);
        self
    }

    /// Look up a driver by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Driver>> {
        self.drivers
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::UnknownDriver(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteDriver;

    #[test]
    fn test_register_and_lookup() {
        let registry = DriverRegistry::new();
        registry
            .register("sqlite", Arc::new(SqliteDriver::new()))
            .register("sqlite-fast", Arc::new(SqliteDriver::new()));

        assert!(registry.contains("sqlite"));
        assert_eq!(registry.names(), vec!["sqlite", "sqlite-fast"]);

        let driver = registry.get("sqlite").unwrap();
        assert!(driver.open(":memory:").is_ok());
    }

    #[test]
    fn test_unknown_driver() {
        let registry = DriverRegistry::new();
        match registry.get("postgres") {
            Err(Error::UnknownDriver(name)) => assert_eq!(name, "postgres"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
