//! Step eligibility per execution mode.

use catena_chain::{Chain, Step};
use catena_config::ExecutionMode;
use catena_store::StepStatus;
use tracing::warn;

use crate::condition::ConditionEvaluator;
use crate::context::ContextView;
use crate::error::ExpressionError;

/// Decisions for one iteration of the executor loop.
#[derive(Debug, Default)]
pub struct Schedule {
  /// Steps to dispatch together in this iteration.
  pub run: Vec<String>,
  /// Steps whose condition evaluated false.
  pub skip: Vec<String>,
  /// Steps whose condition could not be evaluated.
  pub fail: Vec<(String, ExpressionError)>,
}

impl Schedule {
  pub fn is_empty(&self) -> bool {
    self.run.is_empty() && self.skip.is_empty() && self.fail.is_empty()
  }
}

/// Decides which pending steps become runnable.
pub struct StepScheduler<'a> {
  chain: &'a Chain,
  evaluator: &'a ConditionEvaluator,
}

impl<'a> StepScheduler<'a> {
  pub fn new(chain: &'a Chain, evaluator: &'a ConditionEvaluator) -> Self {
    Self { chain, evaluator }
  }

  pub fn next(&self, view: &ContextView<'_>) -> Schedule {
    match self.chain.execution_mode {
      ExecutionMode::Sequential => self.next_sequential(view),
      ExecutionMode::Parallel => self.next_parallel(view),
      ExecutionMode::Conditional => self.next_conditional(view),
    }
  }

  /// At most one step: the first pending step whose predecessor succeeded.
  fn next_sequential(&self, view: &ContextView<'_>) -> Schedule {
    if view.has_running() {
      return Schedule::default();
    }

    let eligible: Vec<&Step> = self
      .pending(view)
      .into_iter()
      .filter(|step| predecessors_succeeded(step, view))
      .collect();

    if eligible.len() > 1 {
      let candidates: Vec<&str> = eligible.iter().map(|s| s.name.as_str()).collect();
      warn!(
        chain_id = %self.chain.chain_id,
        candidates = ?candidates,
        chosen = %eligible[0].name,
        "sequential_tie_break"
      );
    }

    Schedule {
      run: eligible.first().map(|s| vec![s.name.clone()]).unwrap_or_default(),
      ..Default::default()
    }
  }

  /// Every pending step whose predecessors all succeeded.
  fn next_parallel(&self, view: &ContextView<'_>) -> Schedule {
    Schedule {
      run: self
        .pending(view)
        .into_iter()
        .filter(|step| predecessors_succeeded(step, view))
        .map(|step| step.name.clone())
        .collect(),
      ..Default::default()
    }
  }

  /// Every pending step whose predecessors are all resolved, split by the
  /// outcome of its condition.
  fn next_conditional(&self, view: &ContextView<'_>) -> Schedule {
    let mut schedule = Schedule::default();

    for step in self.pending(view) {
      if !step.predecessors.iter().all(|p| view.is_resolved(p)) {
        continue;
      }

      let Some(condition) = &step.condition else {
        schedule.run.push(step.name.clone());
        continue;
      };

      match self.evaluator.evaluate(condition, view) {
        Ok(true) => schedule.run.push(step.name.clone()),
        Ok(false) => schedule.skip.push(step.name.clone()),
        Err(e) => schedule.fail.push((step.name.clone(), e)),
      }
    }

    schedule
  }

  fn pending(&self, view: &ContextView<'_>) -> Vec<&'a Step> {
    self
      .chain
      .steps()
      .iter()
      .filter(|step| view.status(&step.name) == StepStatus::Pending)
      .collect()
  }
}

fn predecessors_succeeded(step: &Step, view: &ContextView<'_>) -> bool {
  step
    .predecessors
    .iter()
    .all(|p| view.status(p) == StepStatus::Succeeded)
}

#[cfg(test)]
mod tests {
  use std::collections::{BTreeMap, HashMap};

  use catena_config::{AgentRef, ChainDef, FailurePolicy, StepDef};
  use catena_store::StepOutput;
  use serde_json::json;

  use super::*;

  fn chain(mode: ExecutionMode, steps: Vec<StepDef>) -> Chain {
    Chain::lock(ChainDef {
      chain_id: "sched".to_string(),
      name: "Scheduler".to_string(),
      version: 1,
      execution_mode: mode,
      failure_policy: FailurePolicy::FailFast,
      input_schema: None,
      retry: None,
      steps,
    })
    .unwrap()
  }

  fn step(name: &str) -> StepDef {
    StepDef::new(name, AgentRef::native("echo"))
  }

  #[derive(Default)]
  struct State {
    input: serde_json::Value,
    outputs: BTreeMap<String, StepOutput>,
    statuses: HashMap<String, StepStatus>,
  }

  impl State {
    fn set(&mut self, step: &str, status: StepStatus, output: Option<serde_json::Value>) {
      self.statuses.insert(step.to_string(), status);
      let entry = match output {
        Some(value) => StepOutput::Produced(value),
        None => StepOutput::Absent,
      };
      if status.is_terminal() {
        self.outputs.insert(step.to_string(), entry);
      }
    }

    fn view(&self) -> ContextView<'_> {
      ContextView::new(&self.input, &self.outputs, &self.statuses)
    }
  }

  #[test]
  fn test_sequential_runs_one_step_at_a_time() {
    let chain = chain(ExecutionMode::Sequential, vec![step("a"), step("b"), step("c")]);
    let eval = ConditionEvaluator::new();
    let scheduler = StepScheduler::new(&chain, &eval);
    let mut state = State::default();

    assert_eq!(scheduler.next(&state.view()).run, vec!["a"]);

    state.set("a", StepStatus::Running, None);
    assert!(scheduler.next(&state.view()).is_empty());

    state.set("a", StepStatus::Succeeded, Some(json!(1)));
    assert_eq!(scheduler.next(&state.view()).run, vec!["b"]);
  }

  #[test]
  fn test_sequential_stops_after_failed_predecessor() {
    let chain = chain(ExecutionMode::Sequential, vec![step("a"), step("b")]);
    let eval = ConditionEvaluator::new();
    let scheduler = StepScheduler::new(&chain, &eval);
    let mut state = State::default();

    state.set("a", StepStatus::Failed, None);
    assert!(scheduler.next(&state.view()).is_empty());
  }

  #[test]
  fn test_parallel_dispatches_all_ready_steps() {
    let chain = chain(
      ExecutionMode::Parallel,
      vec![
        step("a"),
        step("b"),
        step("c"),
        step("join").depends_on(["a", "b", "c"]),
      ],
    );
    let eval = ConditionEvaluator::new();
    let scheduler = StepScheduler::new(&chain, &eval);
    let mut state = State::default();

    assert_eq!(scheduler.next(&state.view()).run, vec!["a", "b", "c"]);

    state.set("a", StepStatus::Succeeded, Some(json!("a")));
    state.set("b", StepStatus::Succeeded, Some(json!("b")));
    state.set("c", StepStatus::Running, None);
    assert!(scheduler.next(&state.view()).is_empty());

    state.set("c", StepStatus::Succeeded, Some(json!("c")));
    assert_eq!(scheduler.next(&state.view()).run, vec!["join"]);
  }

  #[test]
  fn test_parallel_blocks_downstream_of_failure() {
    let chain = chain(
      ExecutionMode::Parallel,
      vec![step("a"), step("b"), step("after_a").depends_on(["a"])],
    );
    let eval = ConditionEvaluator::new();
    let scheduler = StepScheduler::new(&chain, &eval);
    let mut state = State::default();

    state.set("a", StepStatus::Failed, None);
    assert_eq!(scheduler.next(&state.view()).run, vec!["b"]);
  }

  #[test]
  fn test_conditional_splits_run_and_skip() {
    let chain = chain(
      ExecutionMode::Conditional,
      vec![
        step("classify"),
        step("escalate")
          .depends_on(["classify"])
          .when("classify.output.label == \"urgent\""),
        step("archive")
          .depends_on(["classify"])
          .when("classify.output.label != \"urgent\""),
        step("notify").depends_on(["escalate", "archive"]),
      ],
    );
    let eval = ConditionEvaluator::new();
    let scheduler = StepScheduler::new(&chain, &eval);
    let mut state = State::default();

    assert_eq!(scheduler.next(&state.view()).run, vec!["classify"]);

    state.set("classify", StepStatus::Succeeded, Some(json!({ "label": "urgent" })));
    let schedule = scheduler.next(&state.view());
    assert_eq!(schedule.run, vec!["escalate"]);
    assert_eq!(schedule.skip, vec!["archive"]);
    assert!(schedule.fail.is_empty());

    state.set("escalate", StepStatus::Succeeded, Some(json!("paged")));
    state.set("archive", StepStatus::Skipped, None);
    assert_eq!(scheduler.next(&state.view()).run, vec!["notify"]);
  }

  #[test]
  fn test_conditional_expression_error_fails_step() {
    let chain = chain(
      ExecutionMode::Conditional,
      vec![
        step("a"),
        step("b"),
        step("c").depends_on(["a"]).when("b.output.ok"),
      ],
    );
    let eval = ConditionEvaluator::new();
    let scheduler = StepScheduler::new(&chain, &eval);
    let mut state = State::default();

    state.set("a", StepStatus::Succeeded, Some(json!({})));
    state.set("b", StepStatus::Running, None);

    let schedule = scheduler.next(&state.view());
    assert!(schedule.run.is_empty());
    assert_eq!(schedule.fail.len(), 1);
    assert_eq!(schedule.fail[0].0, "c");
    assert!(matches!(
      schedule.fail[0].1,
      ExpressionError::UnresolvedStep { ref step, .. } if step == "b"
    ));
  }
}
