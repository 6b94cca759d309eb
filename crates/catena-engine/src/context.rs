use std::collections::{BTreeMap, HashMap};

use catena_store::{StepOutput, StepStatus};

/// Read-only view of an execution's accumulated state.
///
/// The scheduler, router and condition evaluator only ever see this view;
/// the executor is the sole writer of the state behind it.
#[derive(Debug, Clone, Copy)]
pub struct ContextView<'a> {
  input: &'a serde_json::Value,
  outputs: &'a BTreeMap<String, StepOutput>,
  statuses: &'a HashMap<String, StepStatus>,
}

impl<'a> ContextView<'a> {
  pub fn new(
    input: &'a serde_json::Value,
    outputs: &'a BTreeMap<String, StepOutput>,
    statuses: &'a HashMap<String, StepStatus>,
  ) -> Self {
    Self {
      input,
      outputs,
      statuses,
    }
  }

  /// The chain input.
  pub fn input(&self) -> &'a serde_json::Value {
    self.input
  }

  /// Status of a step; steps not yet materialized are pending.
  pub fn status(&self, step: &str) -> StepStatus {
    self
      .statuses
      .get(step)
      .copied()
      .unwrap_or(StepStatus::Pending)
  }

  pub fn is_resolved(&self, step: &str) -> bool {
    self.status(step).is_terminal()
  }

  pub fn output(&self, step: &str) -> Option<&'a StepOutput> {
    self.outputs.get(step)
  }

  /// Every materialized step and its status.
  pub fn statuses(self) -> impl Iterator<Item = (&'a String, StepStatus)> + 'a {
    self.statuses.iter().map(|(name, status)| (name, *status))
  }

  /// Whether any step is currently running.
  pub fn has_running(&self) -> bool {
    self.statuses.values().any(|s| *s == StepStatus::Running)
  }
}
