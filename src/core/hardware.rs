//! Hardware registry - static descriptions of the devices on the bench

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// How a device is reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConnectionType {
    Visa,
    Direct,
    Other(String),
}

impl From<String> for ConnectionType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "VISA" => ConnectionType::Visa,
            "DIRECT" => ConnectionType::Direct,
            _ => ConnectionType::Other(value),
        }
    }
}

impl From<ConnectionType> for String {
    fn from(value: ConnectionType) -> Self {
        match value {
            ConnectionType::Visa => "VISA".to_string(),
            ConnectionType::Direct => "DIRECT".to_string(),
            ConnectionType::Other(other) => other,
        }
    }
}

/// One entry of the hardware registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Connection type
    #[serde(rename = "Type")]
    pub connection: ConnectionType,

    /// Default address, if one is configured
    #[serde(rename = "Default", default)]
    pub default_address: Option<String>,

    /// Driver identifier
    #[serde(rename = "Driver")]
    pub driver: String,
}

impl DeviceDescriptor {
    pub fn new(connection: ConnectionType, default_address: Option<&str>, driver: &str) -> Self {
        Self {
            connection,
            default_address: default_address
                .filter(|a| !a.trim().is_empty())
                .map(str::to_string),
            driver: driver.to_string(),
        }
    }

    /// The address to use without asking anyone, if the connection type allows it
    pub fn automatic_address(&self) -> Option<&str> {
        match self.connection {
            ConnectionType::Visa | ConnectionType::Direct => self
                .default_address
                .as_deref()
                .filter(|a| !a.trim().is_empty()),
            ConnectionType::Other(_) => None,
        }
    }
}

/// Device identifier -> descriptor, read-only for the core
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HardwareRegistry {
    devices: BTreeMap<String, DeviceDescriptor>,
}

impl HardwareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, name: &str, descriptor: DeviceDescriptor) -> Self {
        self.devices.insert(name.to_string(), descriptor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&DeviceDescriptor> {
        self.devices.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeviceDescriptor)> {
        self.devices.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Load the registry from a JSON file, or YAML when the extension says so
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read hardware registry {}", path.display()))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
            _ => Ok(serde_json::from_str(&content)?),
        }
    }
}
