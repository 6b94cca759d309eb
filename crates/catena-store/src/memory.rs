use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::types::{ChainExecution, ExecutionStep, StoredExecution};
use crate::{ExecutionStore, StoreError};

/// In-process store, useful for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
  executions: RwLock<HashMap<String, ChainExecution>>,
  steps: RwLock<HashMap<String, Vec<ExecutionStep>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
  async fn save_execution(&self, execution: &ChainExecution) -> Result<(), StoreError> {
    self
      .executions
      .write()
      .await
      .insert(execution.execution_id.clone(), execution.clone());
    Ok(())
  }

  async fn save_step(&self, step: &ExecutionStep) -> Result<(), StoreError> {
    let mut steps = self.steps.write().await;
    let records = steps.entry(step.execution_id.clone()).or_default();
    match records.iter_mut().find(|s| s.step_id == step.step_id) {
      Some(existing) => *existing = step.clone(),
      None => records.push(step.clone()),
    }
    Ok(())
  }

  async fn load_execution(&self, execution_id: &str) -> Result<StoredExecution, StoreError> {
    let execution = self
      .executions
      .read()
      .await
      .get(execution_id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))?;
    let steps = self.list_steps(execution_id).await?;

    Ok(StoredExecution { execution, steps }.reconcile())
  }

  async fn list_steps(&self, execution_id: &str) -> Result<Vec<ExecutionStep>, StoreError> {
    let mut steps = self
      .steps
      .read()
      .await
      .get(execution_id)
      .cloned()
      .unwrap_or_default();
    steps.sort_by(|a, b| a.order.cmp(&b.order).then(a.step_name.cmp(&b.step_name)));
    Ok(steps)
  }

  async fn list_executions(&self, chain_id: &str) -> Result<Vec<ChainExecution>, StoreError> {
    let mut executions: Vec<ChainExecution> = self
      .executions
      .read()
      .await
      .values()
      .filter(|e| e.chain_id == chain_id)
      .cloned()
      .collect();
    executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(executions)
  }
}
