//! Artifact store - compiled configurations and generated procedures on disk
//!
//! A compile produces `<configs>/<base>.json` and `<procedures>/<base>.yaml`
//! sharing one base name. A run leaves `manifest.json`, and optionally
//! `data_map.json`, in its results directory.

use crate::core::{CompiledConfiguration, GeneratedProcedure, Settings, StageKind};
use crate::execution::RunOutcome;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct ArtifactStore {
    configs_dir: PathBuf,
    procedures_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(configs_dir: impl Into<PathBuf>, procedures_dir: impl Into<PathBuf>) -> Self {
        Self {
            configs_dir: configs_dir.into(),
            procedures_dir: procedures_dir.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.configs_dir, &settings.procedures_dir)
    }

    pub fn config_path(&self, base_name: &str) -> PathBuf {
        self.configs_dir.join(format!("{}.json", base_name))
    }

    pub fn procedure_path(&self, base_name: &str) -> PathBuf {
        self.procedures_dir.join(format!("{}.yaml", base_name))
    }

    /// Write both artifacts, returning their paths
    pub fn save(
        &self,
        base_name: &str,
        config: &CompiledConfiguration,
        procedure: &GeneratedProcedure,
    ) -> Result<(PathBuf, PathBuf)> {
        let config_path = self.config_path(base_name);
        let procedure_path = self.procedure_path(base_name);

        write_file(&config_path, &config.to_json()?)?;
        write_file(&procedure_path, &procedure.to_yaml()?)?;

        info!(
            "Saved {} to {} and {}",
            base_name,
            config_path.display(),
            procedure_path.display()
        );
        Ok((config_path, procedure_path))
    }

    pub fn load_config(&self, base_name: &str) -> Result<CompiledConfiguration> {
        CompiledConfiguration::from_file(self.config_path(base_name))
    }

    pub fn load_procedure(&self, name: &str) -> Result<GeneratedProcedure> {
        GeneratedProcedure::from_file(self.procedure_path(name))
    }

    /// Every procedure a configuration's stages name
    pub fn load_procedures(&self, config: &CompiledConfiguration) -> Result<Vec<GeneratedProcedure>> {
        let mut procedures: Vec<GeneratedProcedure> = Vec::new();
        for stage in config.experiment.iter().filter(|s| s.kind == StageKind::Procedure) {
            if procedures.iter().any(|p| p.name == stage.source) {
                continue;
            }
            let procedure = self
                .load_procedure(&stage.source)
                .with_context(|| format!("Stage {} of {}", stage, config.name))?;
            config.validate_devices(procedure.devices())?;
            procedures.push(procedure);
        }
        debug!("Loaded {} procedures for {}", procedures.len(), config.name);
        Ok(procedures)
    }

    /// Base names of every saved configuration, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.configs_dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.configs_dir)
            .with_context(|| format!("Failed to list {}", self.configs_dir.display()))?
        {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem() {
                    names.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Run manifest written into each results directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Final data map, written on request
pub const DATA_MAP_FILE: &str = "data_map.json";

/// Write the manifest (and optionally the data map) of a finished run,
/// returning the manifest path
pub fn save_run_output(outcome: &RunOutcome, save_data: bool) -> Result<PathBuf> {
    let directory = outcome.result.directory();
    let manifest_path = directory.join(MANIFEST_FILE);
    write_file(
        &manifest_path,
        &serde_json::to_string_pretty(&outcome.result.export())?,
    )?;

    if save_data {
        write_file(
            &directory.join(DATA_MAP_FILE),
            &serde_json::to_string_pretty(&outcome.data)?,
        )?;
    }
    Ok(manifest_path)
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
