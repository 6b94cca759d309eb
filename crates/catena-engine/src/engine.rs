//! The chain engine: submission, cancellation and observation of executions.
//!
//! Each started execution runs on its own task. The engine keeps a handle to
//! every execution it is still running; finished executions are served from
//! the store.

use std::collections::HashMap;
use std::sync::Arc;

use catena_agent::AgentInvoker;
use catena_chain::Chain;
use catena_config::ChainDef;
use catena_store::{
  ChainExecution, ExecutionStatus, ExecutionStore, Progress, StoreError, StoredExecution,
};
use serde::Serialize;
use tokio::sync::{RwLock, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{BroadcastNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::executor::{ChainExecutor, RunChannels};
use crate::input::validate_input;

/// Current status and progress of an execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
  pub execution_id: String,
  pub status: ExecutionStatus,
  pub progress: Progress,
  pub failed_step: Option<String>,
}

impl From<&ChainExecution> for StatusReport {
  fn from(execution: &ChainExecution) -> Self {
    Self {
      execution_id: execution.execution_id.clone(),
      status: execution.status,
      progress: execution.progress,
      failed_step: execution.failed_step.clone(),
    }
  }
}

struct RunHandle {
  cancel: CancellationToken,
  events: BroadcastNotifier,
  status: watch::Receiver<ChainExecution>,
}

/// The chain execution engine.
///
/// Generic over the store, the agent invoker and an engine-wide notifier.
/// Use `ChainEngine::new()` for an engine without a notifier, or
/// `ChainEngine::with_notifier()` to observe the events of every execution.
pub struct ChainEngine<S, I, N: ExecutionNotifier = NoopNotifier> {
  store: Arc<S>,
  invoker: Arc<I>,
  notifier: Arc<N>,
  config: EngineConfig,
  runs: Arc<RwLock<HashMap<String, RunHandle>>>,
}

impl<S, I> ChainEngine<S, I, NoopNotifier>
where
  S: ExecutionStore + 'static,
  I: AgentInvoker + 'static,
{
  pub fn new(store: Arc<S>, invoker: Arc<I>, config: EngineConfig) -> Self {
    Self::with_notifier(store, invoker, config, NoopNotifier)
  }
}

impl<S, I, N> ChainEngine<S, I, N>
where
  S: ExecutionStore + 'static,
  I: AgentInvoker + 'static,
  N: ExecutionNotifier + 'static,
{
  pub fn with_notifier(store: Arc<S>, invoker: Arc<I>, config: EngineConfig, notifier: N) -> Self {
    Self {
      store,
      invoker,
      notifier: Arc::new(notifier),
      config,
      runs: Arc::new(RwLock::new(HashMap::new())),
    }
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  /// Validate `def` and `input`, then start a new execution.
  ///
  /// Returns the execution id as soon as the execution is recorded; the
  /// chain runs in the background.
  pub async fn start(&self, def: ChainDef, input: serde_json::Value) -> Result<String, EngineError> {
    let chain = Chain::lock(def)?;
    self.start_locked(Arc::new(chain), input).await
  }

  /// Start a new execution of an already locked chain.
  pub async fn start_locked(
    &self,
    chain: Arc<Chain>,
    input: serde_json::Value,
  ) -> Result<String, EngineError> {
    validate_input(chain.input_schema.as_ref(), &input)?;

    let execution_id = uuid::Uuid::new_v4().to_string();
    let execution = ChainExecution::new(
      &execution_id,
      &chain.chain_id,
      chain.version,
      chain.failure_policy,
      input,
      chain.steps().len() as u32,
    );
    self.store.save_execution(&execution).await?;

    let cancel = CancellationToken::new();
    let events = BroadcastNotifier::new(self.config.event_buffer);
    let (status_tx, status_rx) = watch::channel(execution.clone());

    let executor = ChainExecutor::new(
      Arc::clone(&chain),
      execution,
      Arc::clone(&self.store),
      Arc::clone(&self.invoker),
      Arc::clone(&self.notifier),
      &self.config,
      RunChannels {
        cancel: cancel.clone(),
        events: events.clone(),
        status: status_tx,
      },
    );

    self.runs.write().await.insert(
      execution_id.clone(),
      RunHandle {
        cancel,
        events,
        status: status_rx,
      },
    );

    info!(
      execution_id = %execution_id,
      chain_id = %chain.chain_id,
      chain_version = chain.version,
      "execution_submitted"
    );

    let runs = Arc::clone(&self.runs);
    let id = execution_id.clone();
    tokio::spawn(async move {
      executor.run().await;
      runs.write().await.remove(&id);
    });

    Ok(execution_id)
  }

  /// Request cancellation. Takes effect at the next step boundary; calls
  /// already in flight are allowed to finish. Cancelling a finished
  /// execution, or cancelling twice, is a no-op.
  pub async fn cancel(&self, execution_id: &str) -> Result<(), EngineError> {
    let handle = self
      .runs
      .read()
      .await
      .get(execution_id)
      .map(|h| (h.cancel.clone(), h.status.borrow().is_terminal()));

    match handle {
      Some((cancel, terminal)) => {
        if !terminal && !cancel.is_cancelled() {
          info!(execution_id = %execution_id, "execution_cancel_requested");
          cancel.cancel();
        }
        Ok(())
      }
      None => {
        let stored = self.load(execution_id).await?;
        if !stored.execution.is_terminal() {
          warn!(
            execution_id = %execution_id,
            status = ?stored.execution.status,
            "cancel_ignored_not_owned"
          );
        }
        Ok(())
      }
    }
  }

  /// Current status and progress.
  pub async fn status(&self, execution_id: &str) -> Result<StatusReport, EngineError> {
    let live = self
      .runs
      .read()
      .await
      .get(execution_id)
      .map(|h| StatusReport::from(&*h.status.borrow()));

    match live {
      Some(report) => Ok(report),
      None => Ok(StatusReport::from(&self.load(execution_id).await?.execution)),
    }
  }

  /// Subscribe to the events of an execution from now on.
  ///
  /// Events emitted before the call are not replayed. Subscribing to a
  /// finished execution yields only its `ExecutionFinished` event.
  pub async fn subscribe(&self, execution_id: &str) -> Result<Subscription, EngineError> {
    let live = self
      .runs
      .read()
      .await
      .get(execution_id)
      .map(|h| (h.events.subscribe(), h.status.borrow().clone()));

    let (receiver, snapshot) = match live {
      Some((receiver, snapshot)) => (Some(receiver), snapshot),
      None => (None, self.load(execution_id).await?.execution),
    };

    if snapshot.is_terminal() {
      return Ok(Subscription::finished(&snapshot));
    }
    Ok(Subscription {
      execution_id: execution_id.to_string(),
      receiver,
      last: None,
    })
  }

  /// Wait for an execution to reach a terminal status.
  pub async fn wait(&self, execution_id: &str) -> Result<ChainExecution, EngineError> {
    let status = self
      .runs
      .read()
      .await
      .get(execution_id)
      .map(|h| h.status.clone());

    if let Some(mut status) = status {
      if let Ok(execution) = status.wait_for(|e| e.is_terminal()).await {
        return Ok(execution.clone());
      }
    }

    Ok(self.load(execution_id).await?.execution)
  }

  /// Load an execution and its steps.
  ///
  /// Executions still running here return the live record with the stored
  /// steps. Anything else is loaded from the store, reconciled.
  pub async fn load(&self, execution_id: &str) -> Result<StoredExecution, EngineError> {
    let live = self
      .runs
      .read()
      .await
      .get(execution_id)
      .map(|h| h.status.borrow().clone());

    let result = match live {
      Some(execution) => self
        .store
        .list_steps(execution_id)
        .await
        .map(|steps| StoredExecution { execution, steps }),
      None => self.store.load_execution(execution_id).await,
    };

    result.map_err(|e| match e {
      StoreError::NotFound(_) => EngineError::NotFound(execution_id.to_string()),
      other => EngineError::Store(other),
    })
  }
}

/// A stream of the events of one execution. Ends after `ExecutionFinished`.
pub struct Subscription {
  execution_id: String,
  receiver: Option<broadcast::Receiver<ExecutionEvent>>,
  last: Option<ExecutionEvent>,
}

impl Subscription {
  fn finished(execution: &ChainExecution) -> Self {
    Self {
      execution_id: execution.execution_id.clone(),
      receiver: None,
      last: Some(ExecutionEvent::ExecutionFinished {
        execution_id: execution.execution_id.clone(),
        status: execution.status,
        progress: execution.progress,
      }),
    }
  }

  pub fn execution_id(&self) -> &str {
    &self.execution_id
  }

  /// The next event, or `None` once the execution has finished.
  pub async fn next(&mut self) -> Option<ExecutionEvent> {
    if let Some(event) = self.last.take() {
      return Some(event);
    }

    let receiver = self.receiver.as_mut()?;
    let event = loop {
      match receiver.recv().await {
        Ok(event) => break Some(event),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          warn!(execution_id = %self.execution_id, skipped, "subscriber_lagged");
        }
        Err(broadcast::error::RecvError::Closed) => break None,
      }
    };

    if event.as_ref().is_none_or(ExecutionEvent::is_finished) {
      self.receiver = None;
    }
    event
  }
}
