//! Execution events and notifiers for observability.
//!
//! Events are emitted while a chain executes so consumers can observe
//! progress, stream to UIs, log, etc.

use catena_store::{ErrorDetail, ExecutionStatus, Progress};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

/// Events emitted during chain execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
  ExecutionStarted {
    execution_id: String,
    chain_id: String,
  },

  StepStarted {
    execution_id: String,
    step_name: String,
  },

  /// A transient failure is being retried after `delay_ms`.
  StepRetrying {
    execution_id: String,
    step_name: String,
    attempt: u32,
    error: String,
    delay_ms: u64,
  },

  StepSucceeded {
    execution_id: String,
    step_name: String,
    attempts: u32,
    output: serde_json::Value,
  },

  StepFailed {
    execution_id: String,
    step_name: String,
    attempts: u32,
    error: ErrorDetail,
  },

  StepSkipped {
    execution_id: String,
    step_name: String,
  },

  /// Always the last event of an execution.
  ExecutionFinished {
    execution_id: String,
    status: ExecutionStatus,
    progress: Progress,
  },
}

impl ExecutionEvent {
  pub fn execution_id(&self) -> &str {
    match self {
      ExecutionEvent::ExecutionStarted { execution_id, .. }
      | ExecutionEvent::StepStarted { execution_id, .. }
      | ExecutionEvent::StepRetrying { execution_id, .. }
      | ExecutionEvent::StepSucceeded { execution_id, .. }
      | ExecutionEvent::StepFailed { execution_id, .. }
      | ExecutionEvent::StepSkipped { execution_id, .. }
      | ExecutionEvent::ExecutionFinished { execution_id, .. } => execution_id,
    }
  }

  /// The step this event concerns, if any.
  pub fn step_name(&self) -> Option<&str> {
    match self {
      ExecutionEvent::StepStarted { step_name, .. }
      | ExecutionEvent::StepRetrying { step_name, .. }
      | ExecutionEvent::StepSucceeded { step_name, .. }
      | ExecutionEvent::StepFailed { step_name, .. }
      | ExecutionEvent::StepSkipped { step_name, .. } => Some(step_name),
      ExecutionEvent::ExecutionStarted { .. } | ExecutionEvent::ExecutionFinished { .. } => None,
    }
  }

  pub fn is_finished(&self) -> bool {
    matches!(self, ExecutionEvent::ExecutionFinished { .. })
  }
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event of every execution it runs.
/// Implementations must not block.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls the executor. Volume is a
  // handful of events per step.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped.
    let _ = self.sender.send(event);
  }
}

/// A notifier that fans events out to any number of subscribers.
///
/// Subscribers that fall more than `capacity` events behind lose the oldest
/// ones.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
  sender: broadcast::Sender<ExecutionEvent>,
}

impl BroadcastNotifier {
  pub fn new(capacity: usize) -> Self {
    let (sender, _) = broadcast::channel(capacity.max(1));
    Self { sender }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
    self.sender.subscribe()
  }
}

impl ExecutionNotifier for BroadcastNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // No subscribers is fine.
    let _ = self.sender.send(event);
  }
}
