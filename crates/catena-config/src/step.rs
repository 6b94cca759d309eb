use serde::{Deserialize, Serialize};

use crate::agent::AgentRef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
  pub name: String,
  pub agent: AgentRef,
  /// Names of predecessor steps.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,
  /// Branch predicate, only honoured in conditional mode.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub condition: Option<String>,
  /// Order hint; defaults to the declared position.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub order: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_retry_attempts: Option<u32>,
}

impl StepDef {
  /// A step with no dependencies, condition or overrides.
  pub fn new(name: impl Into<String>, agent: AgentRef) -> Self {
    Self {
      name: name.into(),
      agent,
      depends_on: Vec::new(),
      condition: None,
      order: None,
      timeout_ms: None,
      max_retry_attempts: None,
    }
  }

  pub fn depends_on<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.depends_on = names.into_iter().map(Into::into).collect();
    self
  }

  pub fn when(mut self, condition: impl Into<String>) -> Self {
    self.condition = Some(condition.into());
    self
  }
}
