//! SQLite-based persistence store

use crate::core::ExecutionStatus;
use crate::persistence::{ExecutionSummary, PersistenceBackend, RunSummary};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

const COLUMNS: &str = "id, workflow_name, event, status, started_at, completed_at, progress, \
                       total_runs, completed_runs, failed_runs, cancelled_runs, runs";

/// SQLite execution store
pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    /// Create a new SQLite store, creating the database file if needed
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))
            .context("Invalid database path")?
            .create_if_missing(true);

        // A single connection keeps `:memory:` databases shared
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("matrixci");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;

        let db_path = db_dir.join("executions.db");
        let db_path = db_path
            .to_str()
            .ok_or_else(|| anyhow!("Database path is not valid UTF-8"))?;
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                workflow_name TEXT NOT NULL,
                event TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                progress REAL NOT NULL DEFAULT 0.0,
                total_runs INTEGER NOT NULL DEFAULT 0,
                completed_runs INTEGER NOT NULL DEFAULT 0,
                failed_runs INTEGER NOT NULL DEFAULT 0,
                cancelled_runs INTEGER NOT NULL DEFAULT 0,
                runs TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_workflow_name ON executions(workflow_name);
            CREATE INDEX IF NOT EXISTS idx_status ON executions(status);
            CREATE INDEX IF NOT EXISTS idx_started_at ON executions(started_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn parse_status(raw: &str) -> ExecutionStatus {
        match raw {
            "Running" => ExecutionStatus::Running,
            "Completed" => ExecutionStatus::Completed,
            "Failed" => ExecutionStatus::Failed,
            "Cancelled" => ExecutionStatus::Cancelled,
            "Skipped" => ExecutionStatus::Skipped,
            _ => ExecutionStatus::Pending,
        }
    }

    fn from_row(row: &SqliteRow) -> Result<ExecutionSummary> {
        let runs: Vec<RunSummary> = serde_json::from_str(&row.get::<String, _>("runs"))
            .context("Corrupt run list in execution history")?;

        Ok(ExecutionSummary {
            execution_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            workflow_name: row.get("workflow_name"),
            event: row.get("event"),
            status: Self::parse_status(&row.get::<String, _>("status")),
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            progress: row.get("progress"),
            total_runs: row.get::<i64, _>("total_runs") as usize,
            completed_runs: row.get::<i64, _>("completed_runs") as usize,
            failed_runs: row.get::<i64, _>("failed_runs") as usize,
            cancelled_runs: row.get::<i64, _>("cancelled_runs") as usize,
            runs,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteExecutionStore {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        let runs = serde_json::to_string(&execution.runs)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO executions
            (id, workflow_name, event, status, started_at, completed_at, progress,
             total_runs, completed_runs, failed_runs, cancelled_runs, runs)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(execution.execution_id.to_string())
        .bind(&execution.workflow_name)
        .bind(&execution.event)
        .bind(format!("{:?}", execution.status))
        .bind(Self::to_naive(execution.started_at))
        .bind(execution.completed_at.map(Self::to_naive))
        .bind(execution.progress)
        .bind(execution.total_runs as i64)
        .bind(execution.completed_runs as i64)
        .bind(execution.failed_runs as i64)
        .bind(execution.cancelled_runs as i64)
        .bind(runs)
        .execute(&self.pool)
        .await
        .context("Failed to save execution")?;

        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let row = sqlx::query(&format!("SELECT {} FROM executions WHERE id = ?1", COLUMNS))
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load execution")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_executions(&self, workflow_name: &str) -> Result<Vec<ExecutionSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE workflow_name = ?1 ORDER BY started_at DESC",
            COLUMNS
        ))
        .bind(workflow_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list executions")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn get_latest_execution(&self, workflow_name: &str) -> Result<Option<ExecutionSummary>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE workflow_name = ?1 ORDER BY started_at DESC LIMIT 1",
            COLUMNS
        ))
        .bind(workflow_name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get latest execution")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn delete_execution(&self, execution_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM executions WHERE id = ?1")
            .bind(execution_id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to delete execution")?;

        Ok(())
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT workflow_name FROM executions ORDER BY workflow_name ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list workflows")?;

        Ok(rows.iter().map(|row| row.get("workflow_name")).collect())
    }
}
