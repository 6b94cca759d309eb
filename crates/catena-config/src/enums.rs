use serde::{Deserialize, Serialize};

/// How the scheduler decides which steps may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
  /// Single total order; each step depends on the previous one.
  Sequential,
  /// Every step with satisfied dependencies runs concurrently.
  Parallel,
  /// Dependency graph with branch predicates deciding run or skip.
  Conditional,
}

/// What a failed step means for the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
  /// Stop scheduling once the current iteration has resolved.
  #[default]
  FailFast,
  /// Keep running every reachable step, fail at the end.
  BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
  Constant,
  Linear,
  Exponential,
}
