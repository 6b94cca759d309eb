use std::collections::{HashMap, HashSet};

use catena_config::{ChainDef, ExecutionMode, FailurePolicy, RetryDef, StepDef};
use tracing::warn;

use crate::error::ChainError;
use crate::graph::Graph;
use crate::step::Step;

/// Name under which the chain input is visible to conditions.
pub const INPUT_NAME: &str = "input";

/// Globals minijinja defines for conditions. Step names may not take them.
pub const BUILTIN_GLOBALS: &[&str] = &["range", "dict", "namespace", "debug"];

/// A locked chain ready for execution.
#[derive(Debug, Clone)]
pub struct Chain {
  pub chain_id: String,
  pub name: String,
  pub version: u32,
  pub execution_mode: ExecutionMode,
  pub failure_policy: FailurePolicy,
  pub input_schema: Option<serde_json::Value>,
  pub retry: Option<RetryDef>,
  /// Steps sorted by `(order, index)`.
  steps: Vec<Step>,
  graph: Graph,
  warnings: Vec<String>,
}

impl Chain {
  /// Validate a definition and lock it for execution.
  ///
  /// This process:
  /// 1. Validates step names and dependency references
  /// 2. Rejects cyclic dependency graphs
  /// 3. Checks condition expressions for syntax errors
  /// 4. Derives effective predecessors from the execution mode
  pub fn lock(def: ChainDef) -> Result<Self, ChainError> {
    if def.steps.is_empty() {
      return Err(ChainError::Empty);
    }

    let mut names = HashSet::new();
    for step in &def.steps {
      if step.name.is_empty() {
        return Err(ChainError::EmptyStepName);
      }
      if step.name == INPUT_NAME || BUILTIN_GLOBALS.contains(&step.name.as_str()) {
        return Err(ChainError::ReservedStepName(step.name.clone()));
      }
      if !names.insert(step.name.as_str()) {
        return Err(ChainError::DuplicateStep(step.name.clone()));
      }
    }

    validate_dependencies(&def.steps, &names)?;
    detect_cycle(&def.steps)?;
    validate_conditions(&def.steps)?;

    let mut ordered: Vec<(usize, &StepDef)> = def.steps.iter().enumerate().collect();
    ordered.sort_by_key(|(index, step)| (step.order.unwrap_or(*index as u32), *index));

    let mut warnings = Vec::new();
    let mut steps = Vec::with_capacity(ordered.len());
    let mut previous: Option<&str> = None;

    for (index, step_def) in &ordered {
      let predecessors = match def.execution_mode {
        ExecutionMode::Sequential => {
          let implied: Vec<String> = previous.map(|p| vec![p.to_string()]).unwrap_or_default();
          if !step_def.depends_on.is_empty() && step_def.depends_on != implied {
            warnings.push(format!(
              "step '{}' declares depends_on {:?} but sequential mode runs it after {:?}",
              step_def.name, step_def.depends_on, implied
            ));
          }
          implied
        }
        ExecutionMode::Parallel | ExecutionMode::Conditional => step_def.depends_on.clone(),
      };

      if step_def.condition.is_some() && def.execution_mode != ExecutionMode::Conditional {
        warnings.push(format!(
          "step '{}' declares a condition that is ignored outside conditional mode",
          step_def.name
        ));
      }

      steps.push(Step {
        name: step_def.name.clone(),
        agent: step_def.agent.clone(),
        index: *index,
        order: step_def.order.unwrap_or(*index as u32),
        predecessors,
        condition: match def.execution_mode {
          ExecutionMode::Conditional => step_def.condition.clone(),
          _ => None,
        },
        timeout_ms: step_def.timeout_ms,
        max_retry_attempts: step_def.max_retry_attempts,
      });
      previous = Some(step_def.name.as_str());
    }

    for warning in &warnings {
      warn!(chain_id = %def.chain_id, warning = %warning, "chain_definition_warning");
    }

    let graph = Graph::new(&steps);

    Ok(Self {
      chain_id: def.chain_id,
      name: def.name,
      version: def.version,
      execution_mode: def.execution_mode,
      failure_policy: def.failure_policy,
      input_schema: def.input_schema,
      retry: def.retry,
      steps,
      graph,
      warnings,
    })
  }

  /// Steps in execution order.
  pub fn steps(&self) -> &[Step] {
    &self.steps
  }

  /// Get a step by name.
  pub fn get_step(&self, name: &str) -> Option<&Step> {
    self.steps.iter().find(|s| s.name == name)
  }

  /// The graph over effective predecessors.
  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  /// Non-fatal findings from validation.
  pub fn warnings(&self) -> &[String] {
    &self.warnings
  }
}

fn validate_dependencies(steps: &[StepDef], names: &HashSet<&str>) -> Result<(), ChainError> {
  for step in steps {
    for dependency in &step.depends_on {
      if dependency == &step.name {
        return Err(ChainError::SelfDependency(step.name.clone()));
      }
      if !names.contains(dependency.as_str()) {
        return Err(ChainError::UnknownDependency {
          step: step.name.clone(),
          dependency: dependency.clone(),
        });
      }
    }
  }
  Ok(())
}

/// Check for cycles using DFS over the declared dependencies.
fn detect_cycle(steps: &[StepDef]) -> Result<(), ChainError> {
  // Edges point from a step to the steps it depends on.
  let adjacency: HashMap<&str, Vec<&str>> = steps
    .iter()
    .map(|s| {
      (
        s.name.as_str(),
        s.depends_on.iter().map(|d| d.as_str()).collect(),
      )
    })
    .collect();

  #[derive(Clone, Copy, PartialEq)]
  enum Color {
    White,
    Gray,
    Black,
  }

  fn dfs<'a>(
    node: &'a str,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    color: &mut HashMap<&'a str, Color>,
    stack: &mut Vec<&'a str>,
  ) -> Option<Vec<String>> {
    color.insert(node, Color::Gray);
    stack.push(node);

    for &next in adjacency.get(node).map(|v| v.as_slice()).unwrap_or(&[]) {
      match color.get(next).copied().unwrap_or(Color::White) {
        Color::Gray => {
          // Back edge: the cycle is the stack suffix starting at `next`.
          let start = stack.iter().position(|s| *s == next).unwrap_or(0);
          let mut path: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
          path.push(next.to_string());
          return Some(path);
        }
        Color::White => {
          if let Some(path) = dfs(next, adjacency, color, stack) {
            return Some(path);
          }
        }
        Color::Black => {}
      }
    }

    stack.pop();
    color.insert(node, Color::Black);
    None
  }

  let mut color: HashMap<&str, Color> = HashMap::new();
  for step in steps {
    if color.get(step.name.as_str()).is_none() {
      let mut stack = Vec::new();
      if let Some(path) = dfs(step.name.as_str(), &adjacency, &mut color, &mut stack) {
        return Err(ChainError::CycleDetected { path });
      }
    }
  }

  Ok(())
}

fn validate_conditions(steps: &[StepDef]) -> Result<(), ChainError> {
  let env = minijinja::Environment::new();
  for step in steps {
    if let Some(condition) = &step.condition {
      if condition.trim().is_empty() {
        return Err(ChainError::InvalidCondition {
          step: step.name.clone(),
          message: "condition is empty".to_string(),
        });
      }
      env
        .compile_expression(condition)
        .map_err(|e| ChainError::InvalidCondition {
          step: step.name.clone(),
          message: e.to_string(),
        })?;
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use catena_config::AgentRef;

  fn step(name: &str) -> StepDef {
    StepDef::new(name, AgentRef::native("echo"))
  }

  fn def(mode: ExecutionMode, steps: Vec<StepDef>) -> ChainDef {
    ChainDef {
      chain_id: "test-chain".to_string(),
      name: "Test Chain".to_string(),
      version: 1,
      execution_mode: mode,
      failure_policy: FailurePolicy::FailFast,
      input_schema: None,
      retry: None,
      steps,
    }
  }

  #[test]
  fn test_sequential_predecessors_follow_order() {
    let chain = Chain::lock(def(
      ExecutionMode::Sequential,
      vec![step("a"), step("b"), step("c")],
    ))
    .unwrap();

    let preds: Vec<&[String]> = chain
      .steps()
      .iter()
      .map(|s| s.predecessors.as_slice())
      .collect();
    assert!(preds[0].is_empty());
    assert_eq!(preds[1], ["a".to_string()]);
    assert_eq!(preds[2], ["b".to_string()]);
    assert_eq!(chain.graph().sinks(), ["c".to_string()]);
    assert!(chain.warnings().is_empty());
  }

  #[test]
  fn test_order_hint_reorders_steps() {
    let mut first = step("first");
    first.order = Some(10);
    let mut second = step("second");
    second.order = Some(0);

    let chain = Chain::lock(def(ExecutionMode::Sequential, vec![first, second])).unwrap();

    let names: Vec<&str> = chain.steps().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["second", "first"]);
    assert_eq!(chain.get_step("first").unwrap().predecessors, vec!["second"]);
    assert_eq!(chain.get_step("first").unwrap().index, 0);
  }

  #[test]
  fn test_sequential_mismatched_dependency_is_warning() {
    let chain = Chain::lock(def(
      ExecutionMode::Sequential,
      vec![step("a"), step("b"), step("c").depends_on(["a"])],
    ))
    .unwrap();

    assert_eq!(chain.warnings().len(), 1);
    assert_eq!(chain.get_step("c").unwrap().predecessors, vec!["b"]);
  }

  #[test]
  fn test_parallel_uses_declared_dependencies() {
    let chain = Chain::lock(def(
      ExecutionMode::Parallel,
      vec![step("a"), step("b"), step("join").depends_on(["a", "b"])],
    ))
    .unwrap();

    let graph = chain.graph();
    assert_eq!(graph.entry_points(), ["a".to_string(), "b".to_string()]);
    assert!(graph.is_join_point("join"));
    assert_eq!(graph.downstream("a"), ["join".to_string()]);
    assert_eq!(graph.upstream("join"), ["a".to_string(), "b".to_string()]);
  }

  #[test]
  fn test_condition_dropped_outside_conditional_mode() {
    let chain = Chain::lock(def(
      ExecutionMode::Parallel,
      vec![step("a").when("input.flag")],
    ))
    .unwrap();

    assert!(chain.get_step("a").unwrap().condition.is_none());
    assert_eq!(chain.warnings().len(), 1);
  }

  #[test]
  fn test_rejects_empty_chain() {
    let err = Chain::lock(def(ExecutionMode::Parallel, vec![])).unwrap_err();
    assert_eq!(err, ChainError::Empty);
  }

  #[test]
  fn test_rejects_reserved_step_name() {
    let err = Chain::lock(def(ExecutionMode::Parallel, vec![step("input")])).unwrap_err();
    assert_eq!(
      err,
      ChainError::ReservedStepName("input".to_string())
    );

    let err = Chain::lock(def(ExecutionMode::Parallel, vec![step("range")])).unwrap_err();
    assert_eq!(err, ChainError::ReservedStepName("range".to_string()));
  }

  #[test]
  fn test_rejects_duplicate_step() {
    let err = Chain::lock(def(ExecutionMode::Parallel, vec![step("a"), step("a")])).unwrap_err();
    assert_eq!(err, ChainError::DuplicateStep("a".to_string()));
  }

  #[test]
  fn test_rejects_dangling_dependency() {
    let err = Chain::lock(def(
      ExecutionMode::Conditional,
      vec![step("a").depends_on(["ghost"])],
    ))
    .unwrap_err();

    assert_eq!(
      err,
      ChainError::UnknownDependency {
        step: "a".to_string(),
        dependency: "ghost".to_string(),
      }
    );
  }

  #[test]
  fn test_rejects_self_dependency() {
    let err = Chain::lock(def(
      ExecutionMode::Parallel,
      vec![step("a").depends_on(["a"])],
    ))
    .unwrap_err();
    assert_eq!(err, ChainError::SelfDependency("a".to_string()));
  }

  #[test]
  fn test_rejects_cycle() {
    let err = Chain::lock(def(
      ExecutionMode::Conditional,
      vec![
        step("a").depends_on(["c"]),
        step("b").depends_on(["a"]),
        step("c").depends_on(["b"]),
      ],
    ))
    .unwrap_err();

    match err {
      ChainError::CycleDetected { path } => {
        assert_eq!(path.first(), path.last());
        assert_eq!(path.len(), 4);
      }
      other => panic!("expected cycle, got {other:?}"),
    }
  }

  #[test]
  fn test_rejects_malformed_condition() {
    let err = Chain::lock(def(
      ExecutionMode::Conditional,
      vec![step("a"), step("b").depends_on(["a"]).when("a.output >")],
    ))
    .unwrap_err();

    assert!(matches!(err, ChainError::InvalidCondition { step, .. } if step == "b"));
  }

  #[test]
  fn test_diamond_is_not_a_cycle() {
    let chain = Chain::lock(def(
      ExecutionMode::Conditional,
      vec![
        step("root"),
        step("left").depends_on(["root"]),
        step("right").depends_on(["root"]),
        step("merge").depends_on(["left", "right"]),
      ],
    ))
    .unwrap();

    assert_eq!(chain.graph().sinks(), ["merge".to_string()]);
  }
}
