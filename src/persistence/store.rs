//! SQLite-based run history

use crate::core::RunStatus;
use crate::persistence::{ResultStore, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

const SELECT_RUNS: &str = r#"
    SELECT id, experiment, status, started_at, finished_at, completed_stages, total_stages,
           artifact_count, results_dir, failed_stage, error
    FROM experiment_runs
"#;

/// SQLite run history store
pub struct SqliteResultStore {
    pool: SqlitePool,
}

impl SqliteResultStore {
    /// Open (creating if needed) the database at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS experiment_runs (
                id TEXT PRIMARY KEY,
                experiment TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                completed_stages INTEGER NOT NULL DEFAULT 0,
                total_stages INTEGER NOT NULL DEFAULT 0,
                artifact_count INTEGER NOT NULL DEFAULT 0,
                results_dir TEXT NOT NULL,
                failed_stage TEXT,
                error TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_experiment ON experiment_runs(experiment);
            CREATE INDEX IF NOT EXISTS idx_started_at ON experiment_runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn from_row(row: &SqliteRow) -> Result<RunSummary> {
        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            experiment: row.get("experiment"),
            status: RunStatus::parse(&row.get::<String, _>("status")),
            started_at: Self::from_naive(row.get("started_at")),
            finished_at: row
                .get::<Option<NaiveDateTime>, _>("finished_at")
                .map(Self::from_naive),
            completed_stages: row.get::<i64, _>("completed_stages") as usize,
            total_stages: row.get::<i64, _>("total_stages") as usize,
            artifact_count: row.get::<i64, _>("artifact_count") as usize,
            results_dir: row.get("results_dir"),
            failed_stage: row.get("failed_stage"),
            error: row.get("error"),
        })
    }
}

#[async_trait::async_trait]
impl ResultStore for SqliteResultStore {
    async fn save_run(&self, summary: &RunSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO experiment_runs
            (id, experiment, status, started_at, finished_at, completed_stages, total_stages,
             artifact_count, results_dir, failed_stage, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(summary.run_id.to_string())
        .bind(&summary.experiment)
        .bind(summary.status.as_str())
        .bind(Self::to_naive(summary.started_at))
        .bind(summary.finished_at.map(Self::to_naive))
        .bind(summary.completed_stages as i64)
        .bind(summary.total_stages as i64)
        .bind(summary.artifact_count as i64)
        .bind(&summary.results_dir)
        .bind(&summary.failed_stage)
        .bind(&summary.error)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_RUNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_runs(&self, experiment: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let rows = match experiment {
            Some(name) => {
                sqlx::query(&format!(
                    "{} WHERE experiment = ?1 ORDER BY started_at DESC LIMIT ?2",
                    SELECT_RUNS
                ))
                .bind(name)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("{} ORDER BY started_at DESC LIMIT ?1", SELECT_RUNS))
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("Failed to list runs")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn list_experiments(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT experiment
            FROM experiment_runs
            ORDER BY experiment ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list experiments")?;

        Ok(rows.iter().map(|row| row.get("experiment")).collect())
    }
}
