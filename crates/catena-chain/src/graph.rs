use std::collections::{HashMap, HashSet};

use crate::Step;

/// Graph structure for traversal and analysis.
///
/// Lists returned by the accessors follow step order.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
  /// Adjacency list: step -> list of downstream steps.
  adjacency: HashMap<String, Vec<String>>,
  /// Reverse adjacency: step -> list of upstream steps.
  reverse_adjacency: HashMap<String, Vec<String>>,
  /// Steps with no predecessors.
  entry_points: Vec<String>,
  /// Steps nothing depends on.
  sinks: Vec<String>,
  /// Steps with multiple predecessors.
  join_points: HashSet<String>,
}

impl Graph {
  /// Build a graph from ordered steps and their effective predecessors.
  pub fn new(steps: &[Step]) -> Self {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for step in steps {
      adjacency.entry(step.name.clone()).or_default();
      reverse_adjacency.insert(step.name.clone(), step.predecessors.clone());
    }

    for step in steps {
      for up in &step.predecessors {
        adjacency.entry(up.clone()).or_default().push(step.name.clone());
      }
    }

    let entry_points = steps
      .iter()
      .filter(|s| s.predecessors.is_empty())
      .map(|s| s.name.clone())
      .collect();

    let sinks = steps
      .iter()
      .filter(|s| adjacency.get(&s.name).is_none_or(|v| v.is_empty()))
      .map(|s| s.name.clone())
      .collect();

    let join_points = steps
      .iter()
      .filter(|s| s.predecessors.len() > 1)
      .map(|s| s.name.clone())
      .collect();

    Self {
      adjacency,
      reverse_adjacency,
      entry_points,
      sinks,
      join_points,
    }
  }

  /// Get entry points (steps with no predecessors).
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Get sinks (steps with no dependents).
  pub fn sinks(&self) -> &[String] {
    &self.sinks
  }

  /// Get downstream steps for a given step.
  pub fn downstream(&self, step: &str) -> &[String] {
    self
      .adjacency
      .get(step)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get upstream steps for a given step.
  pub fn upstream(&self, step: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(step)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Check if a step is a join point (has multiple predecessors).
  pub fn is_join_point(&self, step: &str) -> bool {
    self.join_points.contains(step)
  }
}
