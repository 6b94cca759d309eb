use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use catena_config::AgentRef;

use crate::error::AgentError;
use crate::invoker::{Agent, Framework};

/// Returns its input verbatim.
#[derive(Debug, Clone, Default)]
pub struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
  async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, AgentError> {
    Ok(input)
  }
}

/// Framework for agents living in this process, keyed by name.
#[derive(Clone, Default)]
pub struct NativeFramework {
  agents: HashMap<String, Arc<dyn Agent>>,
}

impl NativeFramework {
  pub const TAG: &'static str = "native";

  /// Create a framework with the built-in `echo` agent registered.
  pub fn new() -> Self {
    let mut framework = Self::default();
    framework.register("echo", Arc::new(EchoAgent));
    framework
  }

  /// Register an agent, replacing any agent with the same name.
  pub fn register(&mut self, name: impl Into<String>, agent: Arc<dyn Agent>) {
    self.agents.insert(name.into(), agent);
  }

  pub fn contains(&self, name: &str) -> bool {
    self.agents.contains_key(name)
  }
}

#[async_trait]
impl Framework for NativeFramework {
  fn tag(&self) -> &str {
    Self::TAG
  }

  async fn invoke(
    &self,
    agent: &AgentRef,
    input: serde_json::Value,
  ) -> Result<serde_json::Value, AgentError> {
    let Some(native) = self.agents.get(&agent.name) else {
      return Err(AgentError::Permanent(format!("unknown agent: {}", agent)));
    };
    native.invoke(input).await
  }
}
