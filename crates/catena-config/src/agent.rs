use std::fmt;

use serde::{Deserialize, Serialize};

fn default_framework() -> String {
  "native".to_string()
}

/// Reference to an agent, resolved at run time by the framework registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentRef {
  /// Backing framework tag, e.g. "native" or "command".
  #[serde(default = "default_framework")]
  pub framework: String,

  /// Agent name within the framework, e.g. "summarizer".
  pub name: String,

  /// Optional version constraint, interpreted by the framework.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
}

impl AgentRef {
  /// Reference an agent of the `native` framework.
  pub fn native(name: impl Into<String>) -> Self {
    Self {
      framework: default_framework(),
      name: name.into(),
      version: None,
    }
  }

  /// Reference an agent of an arbitrary framework.
  pub fn new(framework: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      framework: framework.into(),
      name: name.into(),
      version: None,
    }
  }
}

impl fmt::Display for AgentRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.framework, self.name)?;
    if let Some(version) = &self.version {
      write!(f, "@{}", version)?;
    }
    Ok(())
  }
}
