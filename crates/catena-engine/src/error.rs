//! Engine error types.

use catena_chain::ChainError;
use catena_store::StoreError;

/// Errors surfaced synchronously by the engine's public contract.
///
/// Step-level failures never appear here; they are recorded on the
/// execution step and observed through status and subscriptions.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// The chain definition is not executable (cycle, dangling reference, ...).
  #[error("invalid chain definition: {0}")]
  InvalidDefinition(#[from] ChainError),

  /// The chain input does not satisfy the chain's input schema.
  #[error("invalid chain input: {0}")]
  InvalidInput(String),

  /// No execution with this id is known.
  #[error("execution not found: {0}")]
  NotFound(String),

  /// The execution store failed.
  #[error("store error: {0}")]
  Store(#[from] StoreError),
}

/// A branch predicate that could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
  /// The expression does not parse.
  #[error("malformed expression '{expression}': {message}")]
  Syntax { expression: String, message: String },

  /// The expression references a step that has not resolved.
  #[error("expression '{expression}' references unresolved step '{step}'")]
  UnresolvedStep { expression: String, step: String },

  /// Evaluation failed, e.g. on an undefined attribute.
  #[error("failed to evaluate '{expression}': {message}")]
  Evaluation { expression: String, message: String },
}
