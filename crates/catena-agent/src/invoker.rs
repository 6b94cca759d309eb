use std::time::Duration;

use async_trait::async_trait;
use catena_config::AgentRef;

use crate::error::AgentError;

/// The capability the chain executor dispatches steps through.
///
/// Implementations must be safe to call concurrently for distinct steps.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
  /// Invoke `agent` with `input`, failing with [`AgentError::Timeout`] if a
  /// deadline is given and exceeded.
  async fn invoke(
    &self,
    agent: &AgentRef,
    input: serde_json::Value,
    timeout: Option<Duration>,
  ) -> Result<serde_json::Value, AgentError>;
}

/// An in-process agent.
#[async_trait]
pub trait Agent: Send + Sync {
  async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, AgentError>;
}

/// One backing framework, selected by the tag stored in [`AgentRef::framework`].
#[async_trait]
pub trait Framework: Send + Sync {
  /// The framework tag this implementation serves.
  fn tag(&self) -> &str;

  async fn invoke(
    &self,
    agent: &AgentRef,
    input: serde_json::Value,
  ) -> Result<serde_json::Value, AgentError>;
}
