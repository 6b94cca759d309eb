//! Catena Engine
//!
//! Executes locked chains against an agent invoker and persists their
//! progress to an execution store.
//!
//! - [`ChainEngine`] is the public surface: start, cancel, status, subscribe
//! - the executor runs one execution as an iteration loop over the
//!   [`StepScheduler`], dispatching runnable steps concurrently
//! - [`router`] builds step inputs from predecessor outputs
//! - [`ConditionEvaluator`] decides conditional branches

mod condition;
mod config;
mod context;
mod engine;
mod error;
mod events;
mod executor;
mod input;
pub mod router;
mod scheduler;

pub use condition::ConditionEvaluator;
pub use config::{EngineConfig, RetryPolicy};
pub use context::ContextView;
pub use engine::{ChainEngine, StatusReport, Subscription};
pub use error::{EngineError, ExpressionError};
pub use events::{
  BroadcastNotifier, ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier,
};
pub use input::{SchemaType, extract_schema_types, validate_input};
pub use scheduler::{Schedule, StepScheduler};
