//! Branch predicate evaluation.
//!
//! Predicates are minijinja expressions evaluated against the chain input
//! and the resolved steps of the execution:
//!
//! ```text
//! input.priority == "high"
//! classify.output.label == "spam" and not enrich.skipped
//! review.status == "failed"
//! ```
//!
//! Each resolved step is exposed as an object with `output` (`none` when the
//! step produced nothing), `status` and `skipped`.

use catena_chain::{BUILTIN_GLOBALS, INPUT_NAME};
use catena_store::StepOutput;
use minijinja::{Environment, UndefinedBehavior};
use serde_json::{Map, Value, json};

use crate::context::ContextView;
use crate::error::ExpressionError;

/// Evaluates step conditions. Evaluation has no side effects and is
/// deterministic for a given view.
pub struct ConditionEvaluator {
  env: Environment<'static>,
}

impl Default for ConditionEvaluator {
  fn default() -> Self {
    Self::new()
  }
}

impl ConditionEvaluator {
  pub fn new() -> Self {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    Self { env }
  }

  /// Evaluate `expression` to a boolean.
  pub fn evaluate(&self, expression: &str, view: &ContextView<'_>) -> Result<bool, ExpressionError> {
    let compiled = self
      .env
      .compile_expression(expression)
      .map_err(|e| ExpressionError::Syntax {
        expression: expression.to_string(),
        message: e.to_string(),
      })?;

    let mut referenced: Vec<String> = compiled.undeclared_variables(false).into_iter().collect();
    referenced.sort();
    for name in referenced {
      // Step names never shadow the builtin globals; `Chain::lock` rejects them.
      if name == INPUT_NAME || BUILTIN_GLOBALS.contains(&name.as_str()) {
        continue;
      }
      if !view.is_resolved(&name) {
        return Err(ExpressionError::UnresolvedStep {
          expression: expression.to_string(),
          step: name,
        });
      }
    }

    let value = compiled
      .eval(build_context(view))
      .map_err(|e| ExpressionError::Evaluation {
        expression: expression.to_string(),
        message: e.to_string(),
      })?;

    Ok(value.is_true())
  }
}

fn build_context(view: &ContextView<'_>) -> Value {
  let mut ctx = Map::new();
  ctx.insert(INPUT_NAME.to_string(), view.input().clone());

  for (name, status) in view.statuses() {
    if !status.is_terminal() {
      continue;
    }
    let output = view
      .output(name)
      .and_then(StepOutput::as_value)
      .cloned()
      .unwrap_or(Value::Null);
    let status_name = serde_json::to_value(status).unwrap_or(Value::Null);
    ctx.insert(
      name.clone(),
      json!({
        "output": output,
        "status": status_name,
        "skipped": status == catena_store::StepStatus::Skipped,
      }),
    );
  }

  Value::Object(ctx)
}

#[cfg(test)]
mod tests {
  use std::collections::{BTreeMap, HashMap};

  use catena_store::StepStatus;

  use super::*;

  struct Fixture {
    input: Value,
    outputs: BTreeMap<String, StepOutput>,
    statuses: HashMap<String, StepStatus>,
  }

  impl Fixture {
    fn new(input: Value) -> Self {
      Self {
        input,
        outputs: BTreeMap::new(),
        statuses: HashMap::new(),
      }
    }

    fn succeeded(mut self, step: &str, output: Value) -> Self {
      self.outputs.insert(step.to_string(), StepOutput::Produced(output));
      self.statuses.insert(step.to_string(), StepStatus::Succeeded);
      self
    }

    fn skipped(mut self, step: &str) -> Self {
      self.outputs.insert(step.to_string(), StepOutput::Absent);
      self.statuses.insert(step.to_string(), StepStatus::Skipped);
      self
    }

    fn running(mut self, step: &str) -> Self {
      self.statuses.insert(step.to_string(), StepStatus::Running);
      self
    }

    fn view(&self) -> ContextView<'_> {
      ContextView::new(&self.input, &self.outputs, &self.statuses)
    }
  }

  #[test]
  fn test_reads_chain_input() {
    let fx = Fixture::new(json!({ "priority": "high" }));
    let eval = ConditionEvaluator::new();

    assert!(eval.evaluate("input.priority == \"high\"", &fx.view()).unwrap());
    assert!(!eval.evaluate("input.priority == \"low\"", &fx.view()).unwrap());
  }

  #[test]
  fn test_reads_step_output_and_status() {
    let fx = Fixture::new(json!({}))
      .succeeded("classify", json!({ "label": "spam", "score": 0.9 }))
      .skipped("enrich");
    let eval = ConditionEvaluator::new();
    let view = fx.view();

    assert!(eval.evaluate("classify.output.label == \"spam\"", &view).unwrap());
    assert!(eval.evaluate("classify.output.score > 0.5", &view).unwrap());
    assert!(eval.evaluate("classify.status == \"succeeded\"", &view).unwrap());
    assert!(eval.evaluate("enrich.skipped", &view).unwrap());
    assert!(eval.evaluate("enrich.output is none", &view).unwrap());
    assert!(!eval.evaluate("classify.skipped", &view).unwrap());
  }

  #[test]
  fn test_evaluation_is_deterministic() {
    let fx = Fixture::new(json!({ "n": 3 })).succeeded("a", json!([1, 2, 3]));
    let eval = ConditionEvaluator::new();
    let view = fx.view();

    let first = eval.evaluate("a.output | length == input.n", &view).unwrap();
    let second = eval.evaluate("a.output | length == input.n", &view).unwrap();
    assert!(first);
    assert_eq!(first, second);
  }

  #[test]
  fn test_unresolved_step_reference() {
    let fx = Fixture::new(json!({})).running("slow");
    let eval = ConditionEvaluator::new();

    let err = eval.evaluate("slow.output.ok", &fx.view()).unwrap_err();
    assert_eq!(
      err,
      ExpressionError::UnresolvedStep {
        expression: "slow.output.ok".to_string(),
        step: "slow".to_string(),
      }
    );

    let err = eval.evaluate("nowhere.status == \"succeeded\"", &fx.view()).unwrap_err();
    assert!(matches!(err, ExpressionError::UnresolvedStep { step, .. } if step == "nowhere"));
  }

  #[test]
  fn test_builtin_globals_are_not_step_references() {
    let fx = Fixture::new(json!({ "n": 3 })).succeeded("a", json!({ "tags": ["x", "y"] }));
    let eval = ConditionEvaluator::new();
    let view = fx.view();

    assert!(eval.evaluate("range(input.n) | length == 3", &view).unwrap());
    assert!(eval.evaluate("dict(k=1).k == 1", &view).unwrap());
    assert!(eval.evaluate("a.output.tags | length == 2", &view).unwrap());
  }

  #[test]
  fn test_malformed_expression() {
    let fx = Fixture::new(json!({}));
    let err = ConditionEvaluator::new()
      .evaluate("input.a ==", &fx.view())
      .unwrap_err();
    assert!(matches!(err, ExpressionError::Syntax { .. }));
  }

  #[test]
  fn test_missing_attribute_is_an_error() {
    let fx = Fixture::new(json!({})).succeeded("a", json!({ "x": 1 }));
    let err = ConditionEvaluator::new()
      .evaluate("a.output.y.z == 1", &fx.view())
      .unwrap_err();
    assert!(matches!(err, ExpressionError::Evaluation { .. }));
  }
}
