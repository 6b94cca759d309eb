//! Catena Chain
//!
//! This crate provides the "locked" chain representation for catena.
//! A locked chain is a validated form of a chain definition that is ready
//! for execution.
//!
//! Key differences from `catena-config`:
//! - Dependency graph is validated (no dangling references, no cycles)
//! - Effective predecessors are derived from the execution mode
//! - Steps are ordered by their order hint
//! - Entry points, sinks and join points are identified

mod chain;
mod error;
mod graph;
mod step;

pub use chain::{BUILTIN_GLOBALS, Chain, INPUT_NAME};
pub use error::ChainError;
pub use graph::Graph;
pub use step::Step;
