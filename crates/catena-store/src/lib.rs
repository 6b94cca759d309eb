//! Catena Store
//!
//! This crate provides the storage trait and implementations for chain
//! executions and their steps. It is the durable record used for recovery
//! and observability.
//!
//! The [`ExecutionStore`] trait defines operations for:
//! - Saving chain executions after every status transition
//! - Saving execution steps after every step resolution
//! - Loading an execution with its steps, reconciled against the step records

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{
  ChainExecution, ErrorDetail, ErrorKind, ExecutionStatus, ExecutionStep, Progress, StepOutput,
  StepStatus, StoredExecution,
};

use async_trait::async_trait;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Applying the schema failed.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Storage trait for chain executions and their steps.
///
/// Saves are upserts keyed by the record id. No atomicity is required across
/// `save_execution` and `save_step`; `load_execution` reconciles the two.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
  /// Insert or update a chain execution.
  async fn save_execution(&self, execution: &ChainExecution) -> Result<(), StoreError>;

  /// Insert or update an execution step.
  async fn save_step(&self, step: &ExecutionStep) -> Result<(), StoreError>;

  /// Load an execution and its steps, reconciled with
  /// [`StoredExecution::reconcile`]. A run still in progress may load as
  /// terminal while some of its step records say `running`.
  async fn load_execution(&self, execution_id: &str) -> Result<StoredExecution, StoreError>;

  /// List the steps of an execution in order.
  async fn list_steps(&self, execution_id: &str) -> Result<Vec<ExecutionStep>, StoreError>;

  /// List executions of a chain, newest first.
  async fn list_executions(&self, chain_id: &str) -> Result<Vec<ChainExecution>, StoreError>;
}
