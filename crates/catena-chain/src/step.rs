use catena_config::AgentRef;
use serde::{Deserialize, Serialize};

/// A validated step of a locked chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
  pub name: String,
  pub agent: AgentRef,
  /// Position in the original definition.
  pub index: usize,
  /// Order hint used for tie-breaks; defaults to `index`.
  pub order: u32,
  /// Effective predecessors for the chain's execution mode.
  pub predecessors: Vec<String>,
  pub condition: Option<String>,
  pub timeout_ms: Option<u64>,
  pub max_retry_attempts: Option<u32>,
}
