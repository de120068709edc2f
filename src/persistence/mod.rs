//! Persistence layer - compiled artifacts and run history

pub mod artifacts;

#[cfg(feature = "sqlite")]
pub mod store;

pub use artifacts::{save_run_output, ArtifactStore, DATA_MAP_FILE, MANIFEST_FILE};

#[cfg(feature = "sqlite")]
pub use store::SqliteResultStore;

use crate::core::RunStatus;
use crate::execution::RunOutcome;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of one experiment run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Experiment (configuration) name
    pub experiment: String,

    pub status: RunStatus,

    pub started_at: DateTime<Utc>,

    /// When the run completed or failed
    pub finished_at: Option<DateTime<Utc>>,

    pub completed_stages: usize,

    pub total_stages: usize,

    /// Number of artifacts the run recorded
    pub artifact_count: usize,

    /// Results directory of the run
    pub results_dir: String,

    /// Source of the stage that failed the run
    pub failed_stage: Option<String>,

    /// Failure message
    pub error: Option<String>,
}

/// Trait for run history backends
#[async_trait::async_trait]
pub trait ResultStore: Send + Sync {
    /// Save a run summary, replacing any summary with the same ID
    async fn save_run(&self, summary: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// Most recent runs first, optionally for one experiment only
    async fn list_runs(&self, experiment: Option<&str>, limit: usize) -> Result<Vec<RunSummary>>;

    /// Every experiment name with at least one run, sorted
    async fn list_experiments(&self) -> Result<Vec<String>>;
}

/// In-memory history (for testing or `--no-history` runs)
#[derive(Default)]
pub struct InMemoryResultStore {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save_run(&self, summary: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(summary.run_id, summary.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, experiment: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut matching: Vec<RunSummary> = runs
            .values()
            .filter(|run| experiment.map_or(true, |name| run.experiment == name))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn list_experiments(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|run| run.experiment.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Create a summary from a finished run
pub fn create_summary(outcome: &RunOutcome) -> RunSummary {
    let state = &outcome.state;
    RunSummary {
        run_id: state.run_id,
        experiment: outcome.experiment.clone(),
        status: state.status,
        started_at: state.started_at.unwrap_or_else(Utc::now),
        finished_at: state.finished_at,
        completed_stages: state.completed_stages,
        total_stages: state.total_stages,
        artifact_count: outcome.result.artifacts().len(),
        results_dir: outcome.result.directory().display().to_string(),
        failed_stage: outcome.failed_stage().map(str::to_string),
        error: outcome.failure.as_ref().map(ToString::to_string),
    }
}
