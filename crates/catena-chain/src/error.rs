use thiserror::Error;

/// A chain definition that cannot be executed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChainError {
  #[error("chain has no steps")]
  Empty,

  #[error("step name must not be empty")]
  EmptyStepName,

  #[error("step name '{0}' is reserved")]
  ReservedStepName(String),

  #[error("duplicate step name: {0}")]
  DuplicateStep(String),

  #[error("step '{step}' depends on unknown step '{dependency}'")]
  UnknownDependency { step: String, dependency: String },

  #[error("step '{0}' depends on itself")]
  SelfDependency(String),

  #[error("cycle detected in chain graph: {}", path.join(" -> "))]
  CycleDetected { path: Vec<String> },

  #[error("invalid condition on step '{step}': {message}")]
  InvalidCondition { step: String, message: String },
}
