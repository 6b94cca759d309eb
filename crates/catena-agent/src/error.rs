use thiserror::Error;

/// Typed failure of an agent invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
  /// The caller may retry.
  #[error("transient agent error: {0}")]
  Transient(String),

  /// The caller must not retry.
  #[error("permanent agent error: {0}")]
  Permanent(String),

  /// The call did not finish within its deadline.
  #[error("agent timed out after {timeout_ms}ms")]
  Timeout { timeout_ms: u64 },
}

impl AgentError {
  /// Whether another attempt may succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, AgentError::Transient(_) | AgentError::Timeout { .. })
  }
}
