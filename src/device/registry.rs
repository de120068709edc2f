//! Driver registry - explicit driver-type to factory mapping

use super::scpi::{ScpiDriver, BUILTIN_MODELS};
use super::Driver;
use crate::core::{CapabilityDescriptor, CapabilityError, CapabilityRegistry};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Creates a fresh driver instance
pub type DriverFactory = Arc<dyn Fn() -> Arc<dyn Driver> + Send + Sync>;

struct DriverEntry {
    capabilities: CapabilityDescriptor,
    factory: DriverFactory,
}

/// Populated at process start; looked up by driver identifier at run time
#[derive(Default)]
pub struct DriverRegistry {
    entries: BTreeMap<String, DriverEntry>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver type with its static capabilities
    pub fn register<F>(&mut self, driver_type: &str, capabilities: CapabilityDescriptor, factory: F)
    where
        F: Fn() -> Arc<dyn Driver> + Send + Sync + 'static,
    {
        debug!("Registered driver {}", driver_type);
        self.entries.insert(
            driver_type.to_string(),
            DriverEntry {
                capabilities,
                factory: Arc::new(factory),
            },
        );
    }

    /// Builder-style [`DriverRegistry::register`]
    pub fn with_driver<F>(mut self, driver_type: &str, capabilities: CapabilityDescriptor, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Driver> + Send + Sync + 'static,
    {
        self.register(driver_type, capabilities, factory);
        self
    }

    pub fn contains(&self, driver_type: &str) -> bool {
        self.entries.contains_key(driver_type)
    }

    /// Create a new instance of a driver
    pub fn instantiate(&self, driver_type: &str) -> Option<Arc<dyn Driver>> {
        self.entries.get(driver_type).map(|entry| (entry.factory)())
    }

    pub fn capabilities(&self, driver_type: &str) -> Option<&CapabilityDescriptor> {
        self.entries.get(driver_type).map(|entry| &entry.capabilities)
    }

    pub fn driver_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Capability registry describing every registered driver
    pub fn capability_registry(&self) -> Result<CapabilityRegistry, CapabilityError> {
        let mut registry = CapabilityRegistry::new();
        for (driver_type, entry) in &self.entries {
            registry.register(driver_type, entry.capabilities.clone())?;
        }
        Ok(registry)
    }

    /// Registry of the built-in SCPI instrument models
    pub fn builtin(timeout: Duration) -> Self {
        let mut registry = Self::new();
        for model in BUILTIN_MODELS.iter().copied() {
            registry.register(model.driver_type, model.capabilities(), move || {
                Arc::new(ScpiDriver::new(model).with_timeout(timeout)) as Arc<dyn Driver>
            });
        }
        registry
    }

    /// Same driver types and capabilities, backed by simulated devices
    pub fn simulated(&self) -> Self {
        let mut registry = Self::new();
        for (driver_type, entry) in &self.entries {
            let name = driver_type.clone();
            let capabilities = entry.capabilities.clone();
            registry.register(driver_type, entry.capabilities.clone(), move || {
                Arc::new(super::SimulatedDriver::new(&name, capabilities.clone())) as Arc<dyn Driver>
            });
        }
        registry
    }
}
