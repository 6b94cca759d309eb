use serde::{Deserialize, Serialize};

use crate::enums::{ExecutionMode, FailurePolicy, RetryBackoff};
use crate::step::StepDef;

fn default_version() -> u32 {
  1
}

/// A chain definition as submitted by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainDef {
  pub chain_id: String,
  pub name: String,
  #[serde(default = "default_version")]
  pub version: u32,
  pub execution_mode: ExecutionMode,
  #[serde(default)]
  pub failure_policy: FailurePolicy,
  /// JSON Schema the chain input must satisfy.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub input_schema: Option<serde_json::Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retry: Option<RetryDef>,
  pub steps: Vec<StepDef>,
}

/// Chain-level retry overrides for transient agent failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryDef {
  /// Total number of agent calls per step, including the first.
  pub max_attempts: u32,
  pub backoff: RetryBackoff,
  pub initial_delay_ms: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_delay_ms: Option<u64>,
}

impl ChainDef {
  /// Parse a chain definition from JSON.
  pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }

  /// Get a step definition by name.
  pub fn step(&self, name: &str) -> Option<&StepDef> {
    self.steps.iter().find(|s| s.name == name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::AgentRef;

  #[test]
  fn test_parse_minimal_definition() {
    let def = ChainDef::from_json(
      r#"{
        "chain_id": "triage",
        "name": "Triage",
        "execution_mode": "sequential",
        "steps": [
          { "name": "classify", "agent": { "name": "classifier" } },
          { "name": "reply", "agent": { "framework": "command", "name": "jq ." } }
        ]
      }"#,
    )
    .unwrap();

    assert_eq!(def.version, 1);
    assert_eq!(def.failure_policy, FailurePolicy::FailFast);
    assert_eq!(def.execution_mode, ExecutionMode::Sequential);
    assert_eq!(def.steps[0].agent, AgentRef::native("classifier"));
    assert_eq!(def.step("reply").unwrap().agent.framework, "command");
    assert!(def.step("missing").is_none());
  }

  #[test]
  fn test_parse_conditional_definition() {
    let def = ChainDef::from_json(
      r#"{
        "chain_id": "review",
        "name": "Review",
        "version": 3,
        "execution_mode": "conditional",
        "failure_policy": "best_effort",
        "retry": { "max_attempts": 5, "backoff": "linear", "initial_delay_ms": 10 },
        "steps": [
          { "name": "score", "agent": { "name": "scorer" } },
          {
            "name": "escalate",
            "agent": { "name": "escalator", "version": "2" },
            "depends_on": ["score"],
            "condition": "score.output.value > 0.5",
            "timeout_ms": 1000
          }
        ]
      }"#,
    )
    .unwrap();

    assert_eq!(def.version, 3);
    assert_eq!(def.failure_policy, FailurePolicy::BestEffort);
    let retry = def.retry.as_ref().unwrap();
    assert_eq!(retry.backoff, RetryBackoff::Linear);
    assert_eq!(retry.max_delay_ms, None);

    let escalate = def.step("escalate").unwrap();
    assert_eq!(escalate.depends_on, vec!["score".to_string()]);
    assert_eq!(escalate.condition.as_deref(), Some("score.output.value > 0.5"));
    assert_eq!(escalate.agent.to_string(), "native:escalator@2");
  }

  #[test]
  fn test_serialize_skips_empty_fields() {
    let def = ChainDef {
      chain_id: "c".to_string(),
      name: "C".to_string(),
      version: 1,
      execution_mode: ExecutionMode::Parallel,
      failure_policy: FailurePolicy::FailFast,
      input_schema: None,
      retry: None,
      steps: vec![StepDef::new("a", AgentRef::native("echo"))],
    };

    let json = serde_json::to_value(&def).unwrap();
    assert!(json.get("input_schema").is_none());
    assert!(json["steps"][0].get("depends_on").is_none());
    assert_eq!(json["execution_mode"], "parallel");
  }
}
