use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use catena_config::FailurePolicy;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;

use crate::types::{
  ChainExecution, ErrorDetail, ExecutionStatus, ExecutionStep, Progress, StepOutput, StepStatus,
  StoredExecution,
};
use crate::{ExecutionStore, StoreError};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

#[derive(FromRow)]
struct ExecutionRow {
  execution_id: String,
  chain_id: String,
  chain_version: i64,
  failure_policy: Json<FailurePolicy>,
  input: Json<serde_json::Value>,
  output: Option<Json<serde_json::Value>>,
  status: ExecutionStatus,
  progress_completed: i64,
  progress_total: i64,
  error: Option<Json<ErrorDetail>>,
  failed_step: Option<String>,
  created_at: DateTime<Utc>,
  started_at: Option<DateTime<Utc>>,
  completed_at: Option<DateTime<Utc>>,
  context: Json<BTreeMap<String, StepOutput>>,
}

impl From<ExecutionRow> for ChainExecution {
  fn from(row: ExecutionRow) -> Self {
    Self {
      execution_id: row.execution_id,
      chain_id: row.chain_id,
      chain_version: row.chain_version as u32,
      failure_policy: row.failure_policy.0,
      input: row.input.0,
      output: row.output.map(|o| o.0),
      status: row.status,
      progress: Progress {
        completed: row.progress_completed as u32,
        total: row.progress_total as u32,
      },
      error: row.error.map(|e| e.0),
      failed_step: row.failed_step,
      created_at: row.created_at,
      started_at: row.started_at,
      completed_at: row.completed_at,
      context: row.context.0,
    }
  }
}

#[derive(FromRow)]
struct StepRow {
  step_id: String,
  execution_id: String,
  step_name: String,
  step_order: i64,
  status: StepStatus,
  attempts: i64,
  input: Option<Json<serde_json::Value>>,
  output: Option<Json<serde_json::Value>>,
  error: Option<Json<ErrorDetail>>,
  started_at: Option<DateTime<Utc>>,
  completed_at: Option<DateTime<Utc>>,
}

impl From<StepRow> for ExecutionStep {
  fn from(row: StepRow) -> Self {
    Self {
      step_id: row.step_id,
      execution_id: row.execution_id,
      step_name: row.step_name,
      order: row.step_order as u32,
      status: row.status,
      attempts: row.attempts as u32,
      input: row.input.map(|i| i.0),
      output: row.output.map(|o| o.0),
      error: row.error.map(|e| e.0),
      started_at: row.started_at,
      completed_at: row.completed_at,
    }
  }
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) a database file and apply migrations.
  pub async fn open(url: &str) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// A private in-memory database with migrations applied.
  pub async fn in_memory() -> Result<Self, StoreError> {
    // Every connection to `sqlite::memory:` is a separate database.
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect("sqlite::memory:")
      .await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(&self.pool).await?;
    Ok(())
  }
}

#[async_trait]
impl ExecutionStore for SqliteStore {
  async fn save_execution(&self, execution: &ChainExecution) -> Result<(), StoreError> {
    sqlx::query(
      r#"
            INSERT INTO chain_executions (
              execution_id, chain_id, chain_version, failure_policy, input, output, status,
              progress_completed, progress_total, error, failed_step, created_at, started_at,
              completed_at, context
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (execution_id) DO UPDATE SET
              output = excluded.output,
              status = excluded.status,
              progress_completed = excluded.progress_completed,
              progress_total = excluded.progress_total,
              error = excluded.error,
              failed_step = excluded.failed_step,
              started_at = excluded.started_at,
              completed_at = excluded.completed_at,
              context = excluded.context
            "#,
    )
    .bind(&execution.execution_id)
    .bind(&execution.chain_id)
    .bind(execution.chain_version as i64)
    .bind(Json(execution.failure_policy))
    .bind(Json(&execution.input))
    .bind(execution.output.as_ref().map(Json))
    .bind(execution.status)
    .bind(execution.progress.completed as i64)
    .bind(execution.progress.total as i64)
    .bind(execution.error.as_ref().map(Json))
    .bind(&execution.failed_step)
    .bind(execution.created_at)
    .bind(execution.started_at)
    .bind(execution.completed_at)
    .bind(Json(&execution.context))
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn save_step(&self, step: &ExecutionStep) -> Result<(), StoreError> {
    sqlx::query(
      r#"
            INSERT INTO execution_steps (
              step_id, execution_id, step_name, step_order, status, attempts, input, output,
              error, started_at, completed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (step_id) DO UPDATE SET
              status = excluded.status,
              attempts = excluded.attempts,
              input = excluded.input,
              output = excluded.output,
              error = excluded.error,
              started_at = excluded.started_at,
              completed_at = excluded.completed_at
            "#,
    )
    .bind(&step.step_id)
    .bind(&step.execution_id)
    .bind(&step.step_name)
    .bind(step.order as i64)
    .bind(step.status)
    .bind(step.attempts as i64)
    .bind(step.input.as_ref().map(Json))
    .bind(step.output.as_ref().map(Json))
    .bind(step.error.as_ref().map(Json))
    .bind(step.started_at)
    .bind(step.completed_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn load_execution(&self, execution_id: &str) -> Result<StoredExecution, StoreError> {
    let row: Option<ExecutionRow> = sqlx::query_as(
      r#"
            SELECT execution_id, chain_id, chain_version, failure_policy, input, output, status,
                   progress_completed, progress_total, error, failed_step, created_at,
                   started_at, completed_at, context
            FROM chain_executions
            WHERE execution_id = ?
            "#,
    )
    .bind(execution_id)
    .fetch_optional(&self.pool)
    .await?;

    let execution = row
      .map(ChainExecution::from)
      .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))?;
    let steps = self.list_steps(execution_id).await?;

    Ok(StoredExecution { execution, steps }.reconcile())
  }

  async fn list_steps(&self, execution_id: &str) -> Result<Vec<ExecutionStep>, StoreError> {
    let rows: Vec<StepRow> = sqlx::query_as(
      r#"
            SELECT step_id, execution_id, step_name, step_order, status, attempts, input,
                   output, error, started_at, completed_at
            FROM execution_steps
            WHERE execution_id = ?
            ORDER BY step_order ASC, step_name ASC
            "#,
    )
    .bind(execution_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(ExecutionStep::from).collect())
  }

  async fn list_executions(&self, chain_id: &str) -> Result<Vec<ChainExecution>, StoreError> {
    let rows: Vec<ExecutionRow> = sqlx::query_as(
      r#"
            SELECT execution_id, chain_id, chain_version, failure_policy, input, output, status,
                   progress_completed, progress_total, error, failed_step, created_at,
                   started_at, completed_at, context
            FROM chain_executions
            WHERE chain_id = ?
            ORDER BY created_at DESC
            "#,
    )
    .bind(chain_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(ChainExecution::from).collect())
  }
}
