//! Builds the input each step receives and the output of a finished chain.
//!
//! - no predecessors: the chain input
//! - one predecessor: that step's output
//! - several predecessors: an object keyed by predecessor name
//!
//! A predecessor that produced nothing contributes `{"$absent": true}`.

use catena_chain::{Chain, Step};
use catena_store::StepOutput;
use serde_json::{Map, Value};

use crate::context::ContextView;

/// Input for `step`, built from the resolved predecessors in `view`.
pub fn step_input(step: &Step, view: &ContextView<'_>) -> Value {
  match step.predecessors.as_slice() {
    [] => view.input().clone(),
    [single] => payload(single, view),
    many => bundle(many, view),
  }
}

/// Output of a completed chain, routed from its sink steps by the same
/// rules as a step input.
pub fn chain_output(chain: &Chain, view: &ContextView<'_>) -> Value {
  match chain.graph().sinks() {
    [] => Value::Null,
    [single] => payload(single, view),
    many => bundle(many, view),
  }
}

fn payload(step: &str, view: &ContextView<'_>) -> Value {
  view
    .output(step)
    .unwrap_or(&StepOutput::Absent)
    .to_payload()
}

fn bundle(steps: &[String], view: &ContextView<'_>) -> Value {
  let map: Map<String, Value> = steps
    .iter()
    .map(|name| (name.clone(), payload(name, view)))
    .collect();
  Value::Object(map)
}
