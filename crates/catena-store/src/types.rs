use std::collections::BTreeMap;

use catena_config::FailurePolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a chain execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl ExecutionStatus {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
    )
  }
}

/// Status of an execution step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum StepStatus {
  Pending,
  Running,
  Skipped,
  Succeeded,
  Failed,
}

impl StepStatus {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      StepStatus::Skipped | StepStatus::Succeeded | StepStatus::Failed
    )
  }
}

/// Classification of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  Transient,
  Permanent,
  Timeout,
  Expression,
  Cancelled,
}

/// A failure recorded against a step or an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
  pub kind: ErrorKind,
  pub message: String,
}

impl ErrorDetail {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }
}

/// What a resolved step contributes to the execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum StepOutput {
  /// The agent ran and returned this payload.
  Produced(serde_json::Value),
  /// The step never produced output (skipped, or failed).
  Absent,
}

impl StepOutput {
  /// Key of the JSON object agents receive in place of an absent output.
  pub const ABSENT_MARKER: &'static str = "$absent";

  /// The payload handed to agents; `Absent` becomes `{"$absent": true}`.
  pub fn to_payload(&self) -> serde_json::Value {
    match self {
      StepOutput::Produced(value) => value.clone(),
      StepOutput::Absent => {
        let mut marker = serde_json::Map::new();
        marker.insert(Self::ABSENT_MARKER.to_string(), serde_json::Value::Bool(true));
        serde_json::Value::Object(marker)
      }
    }
  }

  pub fn as_value(&self) -> Option<&serde_json::Value> {
    match self {
      StepOutput::Produced(value) => Some(value),
      StepOutput::Absent => None,
    }
  }

  pub fn is_absent(&self) -> bool {
    matches!(self, StepOutput::Absent)
  }
}

/// Count of resolved steps out of all steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
  pub completed: u32,
  pub total: u32,
}

/// One run of a chain against a specific input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainExecution {
  pub execution_id: String,
  pub chain_id: String,
  pub chain_version: u32,
  pub failure_policy: FailurePolicy,
  pub input: serde_json::Value,
  /// Populated only on success.
  pub output: Option<serde_json::Value>,
  pub status: ExecutionStatus,
  pub progress: Progress,
  /// Set on failure and cancellation.
  pub error: Option<ErrorDetail>,
  pub failed_step: Option<String>,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  /// Step name -> step output.
  pub context: BTreeMap<String, StepOutput>,
}

impl ChainExecution {
  /// A new execution in `pending`.
  pub fn new(
    execution_id: impl Into<String>,
    chain_id: impl Into<String>,
    chain_version: u32,
    failure_policy: FailurePolicy,
    input: serde_json::Value,
    total_steps: u32,
  ) -> Self {
    Self {
      execution_id: execution_id.into(),
      chain_id: chain_id.into(),
      chain_version,
      failure_policy,
      input,
      output: None,
      status: ExecutionStatus::Pending,
      progress: Progress {
        completed: 0,
        total: total_steps,
      },
      error: None,
      failed_step: None,
      created_at: Utc::now(),
      started_at: None,
      completed_at: None,
      context: BTreeMap::new(),
    }
  }

  pub fn is_terminal(&self) -> bool {
    self.status.is_terminal()
  }
}

/// One step of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
  pub step_id: String,
  pub execution_id: String,
  pub step_name: String,
  pub order: u32,
  pub status: StepStatus,
  /// Number of agent calls made, retries included.
  pub attempts: u32,
  /// Input actually sent to the agent.
  pub input: Option<serde_json::Value>,
  /// Output actually received.
  pub output: Option<serde_json::Value>,
  pub error: Option<ErrorDetail>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionStep {
  /// A new step record in `pending`.
  pub fn new(
    step_id: impl Into<String>,
    execution_id: impl Into<String>,
    step_name: impl Into<String>,
    order: u32,
  ) -> Self {
    Self {
      step_id: step_id.into(),
      execution_id: execution_id.into(),
      step_name: step_name.into(),
      order,
      status: StepStatus::Pending,
      attempts: 0,
      input: None,
      output: None,
      error: None,
      started_at: None,
      completed_at: None,
    }
  }
}

/// An execution as loaded from a store, with its step records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredExecution {
  pub execution: ChainExecution,
  pub steps: Vec<ExecutionStep>,
}

impl StoredExecution {
  /// Recompute a stale execution record from its step records.
  ///
  /// Step saves and execution saves are not atomic, so after a crash the
  /// steps may be ahead of the execution. Terminal executions are returned
  /// untouched.
  pub fn reconcile(mut self) -> Self {
    if self.execution.is_terminal() {
      return self;
    }

    for step in &self.steps {
      let entry = match step.status {
        StepStatus::Succeeded => StepOutput::Produced(
          step.output.clone().unwrap_or(serde_json::Value::Null),
        ),
        StepStatus::Skipped | StepStatus::Failed => StepOutput::Absent,
        StepStatus::Pending | StepStatus::Running => continue,
      };
      self
        .execution
        .context
        .entry(step.step_name.clone())
        .or_insert(entry);
    }

    let resolved = self.steps.iter().filter(|s| s.status.is_terminal()).count() as u32;
    let total = self.execution.progress.total;
    self.execution.progress.completed = self.execution.progress.completed.max(resolved);

    let all_resolved = total > 0 && resolved >= total;
    let failed = self.steps.iter().find(|s| s.status == StepStatus::Failed);

    let status = match (failed, self.execution.failure_policy) {
      (Some(_), FailurePolicy::FailFast) => Some(ExecutionStatus::Failed),
      (Some(_), FailurePolicy::BestEffort) if all_resolved => Some(ExecutionStatus::Failed),
      (None, _) if all_resolved => Some(ExecutionStatus::Completed),
      _ => None,
    };

    if let Some(status) = status {
      if let Some(step) = failed {
        self.execution.failed_step = Some(step.step_name.clone());
        self.execution.error = step.error.clone();
      }
      self.execution.status = status;
      self.execution.completed_at = self.steps.iter().filter_map(|s| s.completed_at).max();
    }

    self
  }
}
