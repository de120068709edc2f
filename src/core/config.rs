//! Compiled configuration - devices, stage ordering and data parameters

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

/// How a stage's source is resolved at run time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StageKind {
    /// A generated procedure, identified by procedure name
    Procedure,
    /// A stage registered with the stage registry
    Builtin,
    /// Anything else; kept so foreign configurations still load
    Other(String),
}

impl From<String> for StageKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PROCEDURE" => StageKind::Procedure,
            "BUILTIN" => StageKind::Builtin,
            _ => StageKind::Other(value),
        }
    }
}

impl From<StageKind> for String {
    fn from(value: StageKind) -> Self {
        match value {
            StageKind::Procedure => "PROCEDURE".to_string(),
            StageKind::Builtin => "BUILTIN".to_string(),
            StageKind::Other(other) => other,
        }
    }
}

/// One entry of the `experiment` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    #[serde(rename = "type")]
    pub kind: StageKind,

    /// Source identifier
    pub source: String,

    /// Order value; equal values form one group
    pub order: u32,
}

impl StageDescriptor {
    pub fn procedure(source: &str, order: u32) -> Self {
        Self {
            kind: StageKind::Procedure,
            source: source.to_string(),
            order,
        }
    }

    pub fn builtin(source: &str, order: u32) -> Self {
        Self {
            kind: StageKind::Builtin,
            source: source.to_string(),
            order,
        }
    }
}

impl fmt::Display for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source, self.order)
    }
}

/// The durable configuration produced by the compiler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledConfiguration {
    pub name: String,

    /// Device identifiers used, in first-use order
    #[serde(default)]
    pub devices: Vec<String>,

    /// Free-form data parameters seeded into the data map at run start
    #[serde(default)]
    pub data: BTreeMap<String, Value>,

    /// Stages to run
    #[serde(default)]
    pub experiment: Vec<StageDescriptor>,
}

impl CompiledConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            devices: Vec::new(),
            data: BTreeMap::new(),
            experiment: Vec::new(),
        }
    }

    /// Append a stage descriptor, builder style
    pub fn with_stage(mut self, stage: StageDescriptor) -> Self {
        self.experiment.push(stage);
        self
    }

    /// Set a data parameter
    pub fn set_data(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Data keys that still have no value
    pub fn missing_data(&self) -> Vec<&str> {
        self.data
            .iter()
            .filter(|(_, v)| v.is_null())
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Distinct order values, ascending
    pub fn orders(&self) -> Vec<u32> {
        let mut orders: Vec<u32> = self.experiment.iter().map(|s| s.order).collect();
        orders.sort_unstable();
        orders.dedup();
        orders
    }

    /// Check that every device a procedure calls is declared here
    pub fn validate_devices<'a, I>(&self, used: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let declared: HashSet<&str> = self.devices.iter().map(String::as_str).collect();
        for device in used {
            if !declared.contains(device) {
                anyhow::bail!(
                    "Device '{}' is used by the procedure but not declared in configuration '{}'",
                    device,
                    self.name
                );
            }
        }
        Ok(())
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        Self::from_json(&content)
    }
}
