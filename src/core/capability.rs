//! Capability registry - which operations each driver type exposes

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// Parameter-name keywords and the unit they imply
const UNIT_KEYWORDS: &[(&str, &str)] = &[
    ("wavelength", "nm"),
    ("time_ps", "ps"),
    ("time_ns", "ns"),
    ("time", "s"),
    ("voltage", "V"),
    ("current", "A"),
    ("bitrate", "kbps"),
    ("path", "string"),
    ("amplitude", "Vp-p"),
    ("bits", "bits"),
    ("optical_power", "dBm"),
];

/// Infer the unit of a parameter from its name.
///
/// The longest matching keyword wins, so `time_ps` is picoseconds.
pub fn infer_unit(parameter: &str) -> Option<&'static str> {
    UNIT_KEYWORDS
        .iter()
        .filter(|(keyword, _)| parameter.contains(keyword))
        .max_by_key(|(keyword, _)| keyword.len())
        .map(|(_, unit)| *unit)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("Unknown driver type: {0}")]
    UnknownDriver(String),

    #[error("Driver type '{0}' is already registered with different capabilities")]
    CapabilityConflict(String),

    #[error("Capability registry was already installed")]
    AlreadyInstalled,
}

/// A formal parameter of a driver operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,

    /// Unit inferred from the name, if any
    pub unit: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let unit = infer_unit(&name).map(str::to_string);
        Self { name, unit }
    }
}

/// Static catalog of the operations one driver type exposes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Operation name -> formal parameters, in declaration order
    pub operations: BTreeMap<String, Vec<Parameter>>,
}

impl CapabilityDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation, builder style
    pub fn with_operation(mut self, name: &str, parameters: &[&str]) -> Self {
        self.operations.insert(
            name.to_string(),
            parameters.iter().map(|p| Parameter::new(*p)).collect(),
        );
        self
    }

    pub fn has_operation(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn parameters(&self, operation: &str) -> Option<&[Parameter]> {
        self.operations.get(operation).map(Vec::as_slice)
    }

    /// Operation names ordered for prefix matching: longest first, then by name
    pub fn operations_by_length(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        names
    }

    /// Human-readable signature, e.g. `run_set_wavelength(wavelength (nm))`
    pub fn signature(&self, operation: &str) -> Option<String> {
        let params = self.operations.get(operation)?;
        let rendered: Vec<String> = params
            .iter()
            .map(|p| match &p.unit {
                Some(unit) => format!("{} ({})", p.name, unit),
                None => p.name.clone(),
            })
            .collect();
        Some(format!("{}({})", operation, rendered.join(", ")))
    }
}

/// Per-driver-type capability cache
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    descriptors: HashMap<String, CapabilityDescriptor>,
}

static GLOBAL: OnceLock<CapabilityRegistry> = OnceLock::new();

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver type. Re-registering an identical descriptor is a no-op.
    pub fn register(
        &mut self,
        driver_type: &str,
        descriptor: CapabilityDescriptor,
    ) -> Result<(), CapabilityError> {
        match self.descriptors.get(driver_type) {
            Some(existing) if *existing == descriptor => Ok(()),
            Some(_) => Err(CapabilityError::CapabilityConflict(driver_type.to_string())),
            None => {
                debug!(
                    "Registered capabilities for {} ({} operations)",
                    driver_type,
                    descriptor.operations.len()
                );
                self.descriptors.insert(driver_type.to_string(), descriptor);
                Ok(())
            }
        }
    }

    pub fn describe(&self, driver_type: &str) -> Result<&CapabilityDescriptor, CapabilityError> {
        self.descriptors
            .get(driver_type)
            .ok_or_else(|| CapabilityError::UnknownDriver(driver_type.to_string()))
    }

    /// Registered driver types, sorted
    pub fn driver_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.descriptors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Freeze this registry as the process-wide instance.
    ///
    /// Must happen once, before any compile or run.
    pub fn install(self) -> Result<&'static CapabilityRegistry, CapabilityError> {
        GLOBAL.set(self).map_err(|_| CapabilityError::AlreadyInstalled)?;
        GLOBAL.get().ok_or(CapabilityError::AlreadyInstalled)
    }

    /// The process-wide registry, if one was installed
    pub fn global() -> Option<&'static CapabilityRegistry> {
        GLOBAL.get()
    }
}
