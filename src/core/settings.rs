//! Application settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where compiled artifacts, results and history live.
///
/// Every field has a default rooted at the platform data directory, so an
/// empty settings file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Compiled configurations (`<base>.json`)
    pub configs_dir: PathBuf,

    /// Generated procedures (`<base>.yaml`)
    pub procedures_dir: PathBuf,

    /// Parent of the per-run results directories
    pub results_dir: PathBuf,

    /// Hardware registry file
    pub hardware_file: PathBuf,

    /// SQLite run history
    pub history_db: PathBuf,

    /// Socket timeout for instrument drivers, in milliseconds
    pub device_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let root = Self::data_root();
        Self {
            configs_dir: root.join("configs"),
            procedures_dir: root.join("procedures"),
            results_dir: root.join("results"),
            hardware_file: root.join("hardware.json"),
            history_db: root.join("history.db"),
            device_timeout_ms: 5000,
        }
    }
}

impl Settings {
    /// `<local data dir>/prober`, or `./prober` when the platform has none
    pub fn data_root() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("prober")
    }

    /// Settings rooted at an arbitrary directory
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            configs_dir: root.join("configs"),
            procedures_dir: root.join("procedures"),
            results_dir: root.join("results"),
            hardware_file: root.join("hardware.json"),
            history_db: root.join("history.db"),
            ..Self::default()
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Load from `path` if given, otherwise use defaults
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}
