//! The chain executor state machine.
//!
//! One executor drives one execution from `running` to a terminal status.
//! Each iteration of its loop asks the scheduler for runnable steps,
//! dispatches all of them, applies their results one by one as invocations
//! resolve, and checkpoints the execution record. Fail-fast and cancellation
//! are only observed between iterations, once every in-flight call of the
//! current iteration has resolved.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use catena_agent::{AgentError, AgentInvoker};
use catena_chain::{Chain, Step};
use catena_config::{AgentRef, FailurePolicy};
use catena_store::{
  ChainExecution, ErrorDetail, ErrorKind, ExecutionStatus, ExecutionStep, ExecutionStore,
  StepOutput, StepStatus,
};
use chrono::Utc;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::condition::ConditionEvaluator;
use crate::config::{EngineConfig, RetryPolicy};
use crate::context::ContextView;
use crate::error::ExpressionError;
use crate::events::{BroadcastNotifier, ExecutionEvent, ExecutionNotifier};
use crate::router;
use crate::scheduler::StepScheduler;

/// Channels shared between an executor and the engine that owns it.
pub(crate) struct RunChannels {
  pub cancel: CancellationToken,
  pub events: BroadcastNotifier,
  pub status: watch::Sender<ChainExecution>,
}

/// Sends every event to the engine-wide notifier and the per-run broadcast.
struct Emitter<N> {
  notifier: Arc<N>,
  events: BroadcastNotifier,
}

impl<N> Clone for Emitter<N> {
  fn clone(&self) -> Self {
    Self {
      notifier: Arc::clone(&self.notifier),
      events: self.events.clone(),
    }
  }
}

impl<N: ExecutionNotifier> Emitter<N> {
  fn emit(&self, event: ExecutionEvent) {
    self.events.notify(event.clone());
    self.notifier.notify(event);
  }
}

/// Result of invoking one step, retries included.
struct StepOutcome {
  attempts: u32,
  result: Result<serde_json::Value, AgentError>,
}

pub(crate) struct ChainExecutor<S, I, N> {
  chain: Arc<Chain>,
  store: Arc<S>,
  invoker: Arc<I>,
  emitter: Emitter<N>,
  retry: RetryPolicy,
  default_timeout: Option<Duration>,
  cancel: CancellationToken,
  status: watch::Sender<ChainExecution>,
  evaluator: ConditionEvaluator,
  execution: ChainExecution,
  steps: HashMap<String, ExecutionStep>,
  statuses: HashMap<String, StepStatus>,
}

impl<S, I, N> ChainExecutor<S, I, N>
where
  S: ExecutionStore + 'static,
  I: AgentInvoker + 'static,
  N: ExecutionNotifier + 'static,
{
  pub(crate) fn new(
    chain: Arc<Chain>,
    execution: ChainExecution,
    store: Arc<S>,
    invoker: Arc<I>,
    notifier: Arc<N>,
    config: &EngineConfig,
    channels: RunChannels,
  ) -> Self {
    let retry = match &chain.retry {
      Some(def) => config.retry.with_overrides(def),
      None => config.retry.clone(),
    };

    Self {
      chain,
      store,
      invoker,
      emitter: Emitter {
        notifier,
        events: channels.events,
      },
      retry,
      default_timeout: config.default_timeout,
      cancel: channels.cancel,
      status: channels.status,
      evaluator: ConditionEvaluator::new(),
      execution,
      steps: HashMap::new(),
      statuses: HashMap::new(),
    }
  }

  /// Drive the execution to a terminal status and return the final record.
  #[instrument(
    name = "chain_execution",
    skip(self),
    fields(
      chain_id = %self.chain.chain_id,
      execution_id = %self.execution.execution_id
    )
  )]
  pub(crate) async fn run(mut self) -> ChainExecution {
    self.execution.status = ExecutionStatus::Running;
    self.execution.started_at = Some(Utc::now());
    self.checkpoint().await;

    info!(steps = self.chain.steps().len(), mode = ?self.chain.execution_mode, "execution_started");
    self.emitter.emit(ExecutionEvent::ExecutionStarted {
      execution_id: self.execution.execution_id.clone(),
      chain_id: self.chain.chain_id.clone(),
    });

    loop {
      if self.cancel.is_cancelled() {
        info!("execution_cancel_observed");
        break;
      }

      let schedule = {
        let view = self.view();
        StepScheduler::new(&self.chain, &self.evaluator).next(&view)
      };
      if schedule.is_empty() {
        break;
      }

      for name in &schedule.skip {
        self.skip_step(name).await;
      }
      for (name, err) in schedule.fail {
        self.fail_condition(&name, err).await;
      }

      if !self.should_stop() && !schedule.run.is_empty() {
        self.run_iteration(schedule.run).await;
      }

      self.checkpoint().await;
      if self.should_stop() {
        info!("fail_fast_triggered");
        break;
      }
    }

    self.finish().await
  }

  fn view(&self) -> ContextView<'_> {
    ContextView::new(
      &self.execution.input,
      &self.execution.context,
      &self.statuses,
    )
  }

  fn should_stop(&self) -> bool {
    self.chain.failure_policy == FailurePolicy::FailFast
      && self.statuses.values().any(|s| *s == StepStatus::Failed)
  }

  /// Dispatch every step of one iteration, then apply results as they arrive.
  async fn run_iteration(&mut self, names: Vec<String>) {
    let chain = Arc::clone(&self.chain);
    let mut in_flight = FuturesUnordered::new();

    for name in names {
      let Some(step) = chain.get_step(&name) else {
        continue;
      };
      let input = router::step_input(step, &self.view());

      let mut record = self.new_record(step);
      record.status = StepStatus::Running;
      record.input = Some(input.clone());
      record.started_at = Some(Utc::now());
      self.statuses.insert(name.clone(), StepStatus::Running);
      self.steps.insert(name.clone(), record.clone());
      self.save_step(&record).await;

      info!(step = %name, agent = %step.agent, "step_started");
      self.emitter.emit(ExecutionEvent::StepStarted {
        execution_id: self.execution.execution_id.clone(),
        step_name: name.clone(),
      });

      let call = StepCall {
        invoker: Arc::clone(&self.invoker),
        emitter: self.emitter.clone(),
        cancel: self.cancel.clone(),
        execution_id: self.execution.execution_id.clone(),
        step_name: name.clone(),
        agent: step.agent.clone(),
        input,
        timeout: step
          .timeout_ms
          .map(Duration::from_millis)
          .or(self.default_timeout),
        retry: match step.max_retry_attempts {
          Some(retries) => self.retry.with_max_retries(retries),
          None => self.retry.clone(),
        },
      };
      in_flight.push(join_step(name, tokio::spawn(call.run())));
    }

    while let Some((name, joined)) = in_flight.next().await {
      let outcome = joined.unwrap_or_else(|e| {
        error!(step = %name, error = %e, "step_task_failed");
        StepOutcome {
          attempts: 1,
          result: Err(AgentError::Permanent(format!("agent task failed: {}", e))),
        }
      });
      self.complete_step(&name, outcome).await;
    }
  }

  async fn complete_step(&mut self, name: &str, outcome: StepOutcome) {
    let execution_id = self.execution.execution_id.clone();
    let Some(record) = self.steps.get_mut(name) else {
      return;
    };
    record.attempts = outcome.attempts;
    record.completed_at = Some(Utc::now());

    let event = match outcome.result {
      Ok(output) => {
        record.status = StepStatus::Succeeded;
        record.output = Some(output.clone());
        self
          .execution
          .context
          .insert(name.to_string(), StepOutput::Produced(output.clone()));
        info!(step = %name, attempts = outcome.attempts, "step_completed");
        ExecutionEvent::StepSucceeded {
          execution_id,
          step_name: name.to_string(),
          attempts: outcome.attempts,
          output,
        }
      }
      Err(err) => {
        let detail = error_detail(&err);
        record.status = StepStatus::Failed;
        record.error = Some(detail.clone());
        self
          .execution
          .context
          .insert(name.to_string(), StepOutput::Absent);
        warn!(step = %name, attempts = outcome.attempts, error = %err, "step_failed");
        ExecutionEvent::StepFailed {
          execution_id,
          step_name: name.to_string(),
          attempts: outcome.attempts,
          error: detail,
        }
      }
    };

    let record = record.clone();
    self.statuses.insert(name.to_string(), record.status);
    self.save_step(&record).await;
    self.update_progress();
    self.emitter.emit(event);
  }

  /// Resolve a step that will never run.
  async fn skip_step(&mut self, name: &str) {
    let Some(step) = self.chain.get_step(name) else {
      return;
    };
    let mut record = self.new_record(step);
    record.status = StepStatus::Skipped;
    record.completed_at = Some(Utc::now());

    self.resolve_without_output(record).await;
    info!(step = %name, "step_skipped");
    self.emitter.emit(ExecutionEvent::StepSkipped {
      execution_id: self.execution.execution_id.clone(),
      step_name: name.to_string(),
    });
  }

  /// Fail a step whose condition could not be evaluated.
  async fn fail_condition(&mut self, name: &str, err: ExpressionError) {
    let Some(step) = self.chain.get_step(name) else {
      return;
    };
    let detail = ErrorDetail::new(ErrorKind::Expression, err.to_string());
    let mut record = self.new_record(step);
    record.status = StepStatus::Failed;
    record.error = Some(detail.clone());
    record.completed_at = Some(Utc::now());

    self.resolve_without_output(record).await;
    warn!(step = %name, error = %err, "step_condition_failed");
    self.emitter.emit(ExecutionEvent::StepFailed {
      execution_id: self.execution.execution_id.clone(),
      step_name: name.to_string(),
      attempts: 0,
      error: detail,
    });
  }

  async fn resolve_without_output(&mut self, record: ExecutionStep) {
    self
      .execution
      .context
      .insert(record.step_name.clone(), StepOutput::Absent);
    self.statuses.insert(record.step_name.clone(), record.status);
    self.steps.insert(record.step_name.clone(), record.clone());
    self.save_step(&record).await;
    self.update_progress();
  }

  fn new_record(&self, step: &Step) -> ExecutionStep {
    ExecutionStep::new(
      uuid::Uuid::new_v4().to_string(),
      &self.execution.execution_id,
      &step.name,
      step.order,
    )
  }

  fn update_progress(&mut self) {
    self.execution.progress.completed =
      self.statuses.values().filter(|s| s.is_terminal()).count() as u32;
    self.publish();
  }

  async fn finish(mut self) -> ChainExecution {
    let chain = Arc::clone(&self.chain);

    for step in chain.steps() {
      if !self.view().status(&step.name).is_terminal() {
        self.skip_step(&step.name).await;
      }
    }

    let first_failed = chain
      .steps()
      .iter()
      .filter_map(|s| self.steps.get(&s.name))
      .find(|r| r.status == StepStatus::Failed)
      .cloned();

    if self.cancel.is_cancelled() {
      self.execution.status = ExecutionStatus::Cancelled;
      self.execution.error = Some(ErrorDetail::new(
        ErrorKind::Cancelled,
        "execution cancelled",
      ));
    } else if let Some(failed) = first_failed {
      self.execution.status = ExecutionStatus::Failed;
      self.execution.failed_step = Some(failed.step_name.clone());
      self.execution.error = failed.error.clone();
    } else {
      self.execution.status = ExecutionStatus::Completed;
      self.execution.output = Some(router::chain_output(&chain, &self.view()));
    }
    self.execution.completed_at = Some(Utc::now());

    if let Err(e) = self.store.save_execution(&self.execution).await {
      error!(error = %e, "final_checkpoint_failed");
    }

    info!(
      status = ?self.execution.status,
      completed = self.execution.progress.completed,
      total = self.execution.progress.total,
      "execution_finished"
    );
    let finished = ExecutionEvent::ExecutionFinished {
      execution_id: self.execution.execution_id.clone(),
      status: self.execution.status,
      progress: self.execution.progress,
    };
    self.emitter.notifier.notify(finished.clone());
    self.publish();
    // Subscribers attaching after the terminal status is visible are served
    // a synthesized final event, so the broadcast goes out last.
    self.emitter.events.notify(finished);

    self.execution
  }

  /// Persist the execution record. Failures are logged; the in-memory
  /// state stays authoritative for the rest of the run.
  async fn checkpoint(&self) {
    if let Err(e) = self.store.save_execution(&self.execution).await {
      error!(error = %e, "checkpoint_failed");
    }
    self.publish();
  }

  async fn save_step(&self, record: &ExecutionStep) {
    if let Err(e) = self.store.save_step(record).await {
      error!(step = %record.step_name, error = %e, "step_checkpoint_failed");
    }
  }

  fn publish(&self) {
    self.status.send_replace(self.execution.clone());
  }
}

async fn join_step(
  name: String,
  handle: JoinHandle<StepOutcome>,
) -> (String, Result<StepOutcome, JoinError>) {
  (name, handle.await)
}

/// One step invocation with its retry loop, run on its own task.
struct StepCall<I, N> {
  invoker: Arc<I>,
  emitter: Emitter<N>,
  cancel: CancellationToken,
  execution_id: String,
  step_name: String,
  agent: AgentRef,
  input: serde_json::Value,
  timeout: Option<Duration>,
  retry: RetryPolicy,
}

impl<I, N> StepCall<I, N>
where
  I: AgentInvoker + 'static,
  N: ExecutionNotifier + 'static,
{
  async fn run(self) -> StepOutcome {
    let mut attempts = 0;

    loop {
      attempts += 1;
      let err = match self
        .invoker
        .invoke(&self.agent, self.input.clone(), self.timeout)
        .await
      {
        Ok(output) => {
          return StepOutcome {
            attempts,
            result: Ok(output),
          };
        }
        Err(err) => err,
      };

      if !err.is_retryable() || attempts >= self.retry.max_attempts || self.cancel.is_cancelled() {
        return StepOutcome {
          attempts,
          result: Err(err),
        };
      }

      let delay = self.retry.delay_for_attempt(attempts - 1);
      warn!(
        step = %self.step_name,
        attempt = attempts,
        delay_ms = delay.as_millis() as u64,
        error = %err,
        "step_retrying"
      );
      self.emitter.emit(ExecutionEvent::StepRetrying {
        execution_id: self.execution_id.clone(),
        step_name: self.step_name.clone(),
        attempt: attempts,
        error: err.to_string(),
        delay_ms: delay.as_millis() as u64,
      });

      tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = self.cancel.cancelled() => {
          return StepOutcome {
            attempts,
            result: Err(err),
          };
        }
      }
    }
  }
}

fn error_detail(err: &AgentError) -> ErrorDetail {
  let kind = match err {
    AgentError::Transient(_) => ErrorKind::Transient,
    AgentError::Permanent(_) => ErrorKind::Permanent,
    AgentError::Timeout { .. } => ErrorKind::Timeout,
  };
  ErrorDetail::new(kind, err.to_string())
}
