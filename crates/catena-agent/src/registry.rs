use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use catena_config::AgentRef;
use tracing::debug;

use crate::command::CommandFramework;
use crate::error::AgentError;
use crate::invoker::{Agent, AgentInvoker, Framework};
use crate::native::NativeFramework;

/// Routes invocations to a [`Framework`] by the agent reference's tag.
pub struct AgentRegistry {
  native: NativeFramework,
  frameworks: HashMap<String, Arc<dyn Framework>>,
}

impl AgentRegistry {
  /// A registry with only the `native` framework and its `echo` agent.
  pub fn new() -> Self {
    Self {
      native: NativeFramework::new(),
      frameworks: HashMap::new(),
    }
  }

  /// A registry with every built-in framework.
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    registry.register_framework(Arc::new(CommandFramework::new()));
    registry
  }

  /// Register an in-process agent under the `native` framework.
  pub fn register_agent(&mut self, name: impl Into<String>, agent: Arc<dyn Agent>) -> &mut Self {
    self.native.register(name, agent);
    self
  }

  /// Register a framework, replacing any framework with the same tag.
  ///
  /// A framework tagged `native` replaces the built-in one, along with the
  /// agents added through [`AgentRegistry::register_agent`].
  pub fn register_framework(&mut self, framework: Arc<dyn Framework>) -> &mut Self {
    self
      .frameworks
      .insert(framework.tag().to_string(), framework);
    self
  }

  fn framework(&self, tag: &str) -> Option<&dyn Framework> {
    match self.frameworks.get(tag) {
      Some(framework) => Some(framework.as_ref()),
      None if tag == NativeFramework::TAG => Some(&self.native as &dyn Framework),
      None => None,
    }
  }
}

impl Default for AgentRegistry {
  fn default() -> Self {
    Self::with_builtins()
  }
}

#[async_trait]
impl AgentInvoker for AgentRegistry {
  async fn invoke(
    &self,
    agent: &AgentRef,
    input: serde_json::Value,
    timeout: Option<Duration>,
  ) -> Result<serde_json::Value, AgentError> {
    let Some(framework) = self.framework(&agent.framework) else {
      return Err(AgentError::Permanent(format!(
        "unknown agent framework: {}",
        agent.framework
      )));
    };

    debug!(agent = %agent, "invoking agent");

    match timeout {
      Some(limit) => tokio::time::timeout(limit, framework.invoke(agent, input))
        .await
        .map_err(|_| AgentError::Timeout {
          timeout_ms: limit.as_millis() as u64,
        })?,
      None => framework.invoke(agent, input).await,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  struct SlowAgent;

  #[async_trait]
  impl Agent for SlowAgent {
    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, AgentError> {
      tokio::time::sleep(Duration::from_millis(500)).await;
      Ok(input)
    }
  }

  struct Upper;

  #[async_trait]
  impl Framework for Upper {
    fn tag(&self) -> &str {
      "upper"
    }

    async fn invoke(
      &self,
      agent: &AgentRef,
      _input: serde_json::Value,
    ) -> Result<serde_json::Value, AgentError> {
      Ok(json!(agent.name.to_uppercase()))
    }
  }

  #[tokio::test]
  async fn test_echo_returns_input() {
    let registry = AgentRegistry::new();
    let output = registry
      .invoke(&AgentRef::native("echo"), json!({"x": 1}), None)
      .await
      .unwrap();
    assert_eq!(output, json!({"x": 1}));
  }

  #[tokio::test]
  async fn test_unknown_agent_is_permanent() {
    let registry = AgentRegistry::new();
    let err = registry
      .invoke(&AgentRef::native("ghost"), json!(null), None)
      .await
      .unwrap_err();
    assert!(matches!(err, AgentError::Permanent(_)));
    assert!(!err.is_retryable());
  }

  #[tokio::test]
  async fn test_unknown_framework_is_permanent() {
    let registry = AgentRegistry::new();
    let err = registry
      .invoke(&AgentRef::new("langchain", "x"), json!(null), None)
      .await
      .unwrap_err();
    assert_eq!(
      err,
      AgentError::Permanent("unknown agent framework: langchain".to_string())
    );
  }

  #[tokio::test]
  async fn test_custom_framework_is_selected_by_tag() {
    let mut registry = AgentRegistry::new();
    registry.register_framework(Arc::new(Upper));
    let output = registry
      .invoke(&AgentRef::new("upper", "shout"), json!(null), None)
      .await
      .unwrap();
    assert_eq!(output, json!("SHOUT"));
  }

  struct Shadow;

  #[async_trait]
  impl Framework for Shadow {
    fn tag(&self) -> &str {
      NativeFramework::TAG
    }

    async fn invoke(
      &self,
      agent: &AgentRef,
      _input: serde_json::Value,
    ) -> Result<serde_json::Value, AgentError> {
      Ok(json!({ "shadowed": agent.name }))
    }
  }

  #[tokio::test]
  async fn test_registered_native_framework_replaces_builtin() {
    let mut registry = AgentRegistry::new();
    registry.register_framework(Arc::new(Shadow));
    let output = registry
      .invoke(&AgentRef::native("echo"), json!({"x": 1}), None)
      .await
      .unwrap();
    assert_eq!(output, json!({ "shadowed": "echo" }));
  }

  #[tokio::test]
  async fn test_timeout_is_reported() {
    let mut registry = AgentRegistry::new();
    registry.register_agent("slow", Arc::new(SlowAgent));

    let err = registry
      .invoke(
        &AgentRef::native("slow"),
        json!(null),
        Some(Duration::from_millis(20)),
      )
      .await
      .unwrap_err();

    assert_eq!(err, AgentError::Timeout { timeout_ms: 20 });
    assert!(err.is_retryable());
  }
}
