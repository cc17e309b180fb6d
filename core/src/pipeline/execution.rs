// sluice/src/pipeline/execution.rs

//! Contains the run API of `Pipeline<I, E>` (`start`, `wait`, `run`, `cancel`) and the
//! handlers that move data between its stages.

use crate::config::CounterPolicy;
use crate::core::strategy::PersistOutcome;
use crate::error::{SluiceError, SluiceResult, StrategyError};
use crate::pipeline::definition::{ConversionFailure, Pipeline, PipelineShared, PersistenceFailure};
use crate::process::child::ChildStage;
use crate::process::state::ProcessState;
use crate::process::trigger::{StopContext, StopPredicate};
use crate::source::SourceProxy;
use crate::stage::conversion::ConversionDirective;
use crate::stage::persistence::{CounterSnapshot, PersistenceDirective};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{event, instrument, Level};

/// Outcome of a run that reached the terminal state without a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
  pub state: ProcessState,
  pub counters: CounterSnapshot,
  pub conversion_failures: u64,
  pub persistence_failures: u64,
  /// `true` if the run ended because [`Pipeline::cancel`] was called.
  pub cancelled: bool,
}

/// Decides, on every child stop, whether the run is over.
///
/// A stop carrying an error cancels every child and ends the run immediately.
/// Otherwise the run is over once no Producer or Consumer child is busy.
pub(crate) fn completion_predicate() -> StopPredicate {
  Arc::new(|ctx: &StopContext<'_>| {
    if let Some(error) = ctx.error {
      event!(Level::WARN, stage = %ctx.child.name(), error = %error, "Stage failed, cancelling every stage.");
      for (_, child) in ctx.children {
        child.cancel();
      }
      return true;
    }
    ctx
      .children
      .iter()
      .filter(|(role, _)| role.participates_in_idle_detection())
      .all(|(_, child)| !child.is_busy())
  })
}

impl<I, E> Pipeline<I, E>
where
  I: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  /// Starts a run and returns as soon as the producers are launched.
  ///
  /// Resets every stage, runs the preparation command if one is set, opens the
  /// persistence adapter, then starts the proxies and the conversion stage.
  #[instrument(name = "Pipeline::start", skip_all, fields(pipeline = %self.shared.name), err(Display))]
  pub async fn start(&self) -> SluiceResult<()> {
    let shared = &self.shared;
    if shared
      .starting
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      return Err(SluiceError::PipelineActive {
        pipeline: shared.name.clone(),
        state: shared.controller.state(),
        operation: "start",
      });
    }
    let _claim = StartClaim(&shared.starting);

    let (adapter, preparation) = {
      let components = shared.components.lock();
      shared.check_idle("start")?;
      let adapter = components
        .as_ref()
        .map(|c| Arc::clone(&c.adapter))
        .ok_or_else(|| SluiceError::NotRegistered {
          pipeline: shared.name.clone(),
        })?;
      (adapter, shared.commands.lock().preparation.clone())
    };

    shared.controller.reset();
    shared.controller.reset_children();
    shared.cancel_requested.store(false, Ordering::SeqCst);
    shared.conversion_failures.store(0, Ordering::SeqCst);
    shared.persistence_failures.store(0, Ordering::SeqCst);
    if shared.counter_policy == CounterPolicy::ResetOnStart {
      shared.counters.reset();
    }

    if let Some(command) = preparation {
      shared.controller.transition_to(ProcessState::PreparingTarget)?;
      event!(Level::INFO, command = %command.name(), "Running preparation command.");
      if let Err(source) = command.execute().await {
        let error = Arc::new(SluiceError::TargetCommandFailed {
          command: command.name().to_string(),
          source,
        });
        shared.controller.abort(Arc::clone(&error));
        return Err(SluiceError::RunFailed(error));
      }
      shared.controller.transition_to(ProcessState::TargetPrepared)?;
    }

    if let Err(source) = adapter.open().await {
      let error = Arc::new(SluiceError::AdapterLifecycle {
        operation: "open",
        source,
      });
      shared.controller.abort(Arc::clone(&error));
      return Err(SluiceError::RunFailed(error));
    }

    let producers = shared.controller.start();
    event!(Level::DEBUG, producers, "Run started.");
    Ok(())
  }

  /// Waits for the current run to reach `Stopped` and for every stage and proxy to
  /// finish the work it had in flight, closes the adapter and, if the run succeeded,
  /// runs the finalization command.
  ///
  /// Must follow a successful [`start`](Self::start); on a pipeline that was never
  /// started it waits forever.
  #[instrument(name = "Pipeline::wait", skip_all, fields(pipeline = %self.shared.name), err(Display))]
  pub async fn wait(&self) -> SluiceResult<RunSummary> {
    let shared = &self.shared;
    let state = shared.controller.wait_for_terminal().await?;
    // A fail-fast run reaches `Stopped` while cancelled stages finish their current directive.
    shared.controller.wait_for_idle_children().await;

    let adapter = shared.components.lock().as_ref().map(|c| Arc::clone(&c.adapter));
    if let Some(adapter) = adapter {
      if let Err(err) = adapter.close().await {
        event!(Level::WARN, error = %err, "Persistence adapter failed to close.");
      }
    }

    if let Some(error) = shared.controller.run_error() {
      event!(Level::ERROR, error = %error, "Run failed.");
      return Err(SluiceError::RunFailed(error));
    }

    let summary = self.summary_in(state);
    if summary.cancelled {
      event!(Level::INFO, "Run cancelled, finalization skipped.");
      return Ok(summary);
    }

    let finalization = shared.commands.lock().finalization.clone();
    if let Some(command) = finalization {
      event!(Level::INFO, command = %command.name(), "Running finalization command.");
      command
        .execute()
        .await
        .map_err(|source| SluiceError::TargetCommandFailed {
          command: command.name().to_string(),
          source,
        })?;
    }

    event!(
      Level::INFO,
      added = summary.counters.added,
      modified = summary.counters.modified,
      unchanged = summary.counters.unchanged,
      removed = summary.counters.removed,
      rolled_back = summary.counters.rolled_back,
      conversion_failures = summary.conversion_failures,
      "Run finished."
    );
    Ok(summary)
  }

  /// [`start`](Self::start) followed by [`wait`](Self::wait).
  pub async fn run(&self) -> SluiceResult<RunSummary> {
    self.start().await?;
    self.wait().await
  }

  /// Cancels every stage and proxy. The run then winds down and `wait` returns a
  /// summary flagged as cancelled.
  pub fn cancel(&self) {
    event!(Level::INFO, pipeline = %self.shared.name, state = ?self.state(), "Cancellation requested.");
    self.shared.cancel_requested.store(true, Ordering::SeqCst);
    self.shared.controller.cancel_children();
  }

  pub fn counters(&self) -> CounterSnapshot {
    self.shared.counters.snapshot()
  }

  pub fn summary(&self) -> RunSummary {
    self.summary_in(self.state())
  }

  fn summary_in(&self, state: ProcessState) -> RunSummary {
    RunSummary {
      state,
      counters: self.shared.counters.snapshot(),
      conversion_failures: self.shared.conversion_failures.load(Ordering::SeqCst),
      persistence_failures: self.shared.persistence_failures.load(Ordering::SeqCst),
      cancelled: self.shared.cancel_requested.load(Ordering::SeqCst),
    }
  }
}

impl<I, E> PipelineShared<I, E>
where
  I: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  /// Drains `proxy` into the conversion stage, one directive per item.
  pub(crate) async fn feed_conversion(&self, proxy: &dyn SourceProxy<I>) {
    let converter = self.components.lock().as_ref().map(|c| Arc::clone(&c.converter));
    let Some(converter) = converter else {
      let mut dropped = 0usize;
      while proxy.next_item().is_some() {
        dropped += 1;
      }
      event!(Level::WARN, proxy = %proxy.name(), dropped, "No converter registered, items dropped.");
      return;
    };

    while let Some(item) = proxy.next_item() {
      let directive = ConversionDirective::new(item, Arc::clone(&converter));
      if let Err(err) = self.conversion.submit(directive).await {
        event!(Level::DEBUG, proxy = %proxy.name(), error = %err, "Item not submitted for conversion.");
      }
    }
  }

  /// Drains conversion results: entities go on to persistence, failures are reported.
  pub(crate) async fn forward_conversion_results(&self) {
    let adapter = self.components.lock().as_ref().map(|c| Arc::clone(&c.adapter));
    while let Some(result) = self.conversion.next_result() {
      let (directive, entity, error) = result.into_parts();
      match (entity, error) {
        (_, Some(error)) => self.report_conversion_failure(directive.into_item(), error),
        (Some(entity), None) => match &adapter {
          Some(adapter) => {
            let directive = PersistenceDirective::new(entity, Arc::clone(adapter));
            if let Err(err) = self.persistence.submit(directive).await {
              event!(Level::DEBUG, error = %err, "Entity not submitted for persistence.");
            }
          }
          None => event!(Level::WARN, pipeline = %self.name, "No persistence adapter registered, entity dropped."),
        },
        (None, None) => event!(Level::WARN, pipeline = %self.name, "Conversion result carried neither entity nor error."),
      }
    }
  }

  /// Drains persistence results, reporting every rollback.
  pub(crate) fn drain_persistence_results(&self) {
    while let Some(result) = self.persistence.next_result() {
      if result.value() == Some(&PersistOutcome::Rollback) {
        let (directive, _, error) = result.into_parts();
        self.report_persistence_failure(directive.into_entity(), error);
      }
    }
  }

  fn report_conversion_failure(&self, item: I, error: StrategyError) {
    self.conversion_failures.fetch_add(1, Ordering::SeqCst);
    event!(Level::WARN, pipeline = %self.name, kind = %error.kind(), error = %error, "Item failed conversion.");
    self.conversion_failed.emit(&ConversionFailure { item, error });
  }

  fn report_persistence_failure(&self, entity: E, error: Option<StrategyError>) {
    self.persistence_failures.fetch_add(1, Ordering::SeqCst);
    match &error {
      Some(err) => event!(Level::WARN, pipeline = %self.name, error = %err, "Entity rolled back."),
      None => event!(Level::WARN, pipeline = %self.name, "Entity rolled back by the adapter."),
    }
    self.persistence_failed.emit(&PersistenceFailure { entity, error });
  }
}

/// Releases the start claim however `start` returns.
struct StartClaim<'a>(&'a AtomicBool);

impl Drop for StartClaim<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}
