//! Catena Agent
//!
//! An agent is an opaque unit that accepts structured input and produces
//! structured output or fails. This crate defines the [`AgentInvoker`]
//! capability the engine dispatches through, and an [`AgentRegistry`] that
//! selects one [`Framework`] implementation per stored framework tag.
//!
//! Built-in frameworks:
//! - `native`: in-process [`Agent`] implementations registered by name
//! - `command`: shell commands speaking JSON over stdin/stdout

mod command;
mod error;
mod invoker;
mod native;
mod registry;

pub use catena_config::AgentRef;
pub use command::CommandFramework;
pub use error::AgentError;
pub use invoker::{Agent, AgentInvoker, Framework};
pub use native::{EchoAgent, NativeFramework};
pub use registry::AgentRegistry;
