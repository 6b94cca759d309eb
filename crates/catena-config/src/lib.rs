//! Catena Config
//!
//! This crate contains the serializable chain definition types for catena.
//! These types represent a chain as it is stored or submitted, before it is
//! validated and locked by `catena-chain`.
//!
//! Definitions can be loaded from:
//! - JSON files (via CLI with `catena run chain.json`)
//! - Database storage (as JSON blobs)

mod agent;
mod chain;
mod enums;
mod step;

pub use agent::AgentRef;
pub use chain::{ChainDef, RetryDef};
pub use enums::{ExecutionMode, FailurePolicy, RetryBackoff};
pub use step::StepDef;
