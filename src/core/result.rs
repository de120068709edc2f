//! Experiment result - artifact bookkeeping and run timing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Format of the per-run directory suffix
pub const RESULTS_TIMESTAMP_FORMAT: &str = "y%Y_m%m_d%d_h%H_m%M_s%S_us%6f";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecorderError {
    #[error("Experiment result was never started")]
    NotStarted,

    #[error("Experiment result was already finalized at {0}")]
    AlreadyFinalized(DateTime<Utc>),
}

/// Serializable snapshot of an experiment result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentManifest {
    pub directory: PathBuf,
    pub artifacts: Vec<PathBuf>,
    #[serde(default)]
    pub config: Option<PathBuf>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Append-only record of what a run produced
#[derive(Debug, Clone)]
pub struct ExperimentResult {
    /// Where stages write their artifacts
    directory: PathBuf,

    /// Artifact paths in the order they were recorded
    artifacts: Vec<PathBuf>,

    /// Copy of the configuration the run executed
    config: Option<PathBuf>,

    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl ExperimentResult {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            artifacts: Vec::new(),
            config: None,
            started_at: None,
            ended_at: None,
        }
    }

    /// Per-run directory under `results_root`, named after the experiment
    /// and the current time
    pub fn timestamped(results_root: &Path, base_name: &str) -> Self {
        let suffix = Utc::now().format(RESULTS_TIMESTAMP_FORMAT);
        Self::new(results_root.join(format!("{}_{}", base_name, suffix)))
    }

    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
    }

    /// Record the end time. A second call is an error.
    pub fn end(&mut self) -> Result<DateTime<Utc>, RecorderError> {
        if let Some(ended_at) = self.ended_at {
            return Err(RecorderError::AlreadyFinalized(ended_at));
        }
        if self.started_at.is_none() {
            return Err(RecorderError::NotStarted);
        }
        let now = Utc::now();
        self.ended_at = Some(now);
        Ok(now)
    }

    pub fn record_artifact(&mut self, path: impl Into<PathBuf>) {
        self.artifacts.push(path.into());
    }

    /// Record where the run's configuration was written. Not an artifact.
    pub fn record_config(&mut self, path: impl Into<PathBuf>) {
        self.config = Some(path.into());
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config.as_deref()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn is_finalized(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn export(&self) -> ExperimentManifest {
        ExperimentManifest {
            directory: self.directory.clone(),
            artifacts: self.artifacts.clone(),
            config: self.config.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}
