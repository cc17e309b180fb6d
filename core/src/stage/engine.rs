// sluice/src/stage/engine.rs

//! Contains the generic `Stage<P>` task engine: a bounded FIFO queue drained by a
//! single worker that turns each directive into a [`StageResult`] through a
//! [`Processor`], and a non-blocking cursor over the produced results.

use crate::core::notify::Signal;
use crate::core::result::StageResult;
use crate::error::{SluiceError, SluiceResult, StrategyError};
use crate::process::child::{ChildId, ChildStage, Lifecycle, LifecycleEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{event, Level};

/// The per-directive work a stage performs.
///
/// Recoverable failures are encoded into the returned result and the stage moves on.
/// An `Err` is fatal: the stage stops and reports the error in its `Stopped` notification.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
  type Directive: Send + 'static;
  type Output: Send + 'static;

  async fn process(
    &self,
    directive: Self::Directive,
  ) -> Result<StageResult<Self::Directive, Self::Output>, StrategyError>;
}

/// Result type a stage driven by `P` produces.
pub type ResultOf<P> = StageResult<<P as Processor>::Directive, <P as Processor>::Output>;

struct QueueState<D> {
  queue: VecDeque<D>,
  max_len: usize,
  running: bool,
  in_flight: bool,
  // Set by cancel() and by a fatal failure; cleared by start() and reset().
  closed: bool,
}

struct StageInner<P: Processor> {
  id: ChildId,
  name: String,
  processor: P,
  state: Mutex<QueueState<P::Directive>>,
  results: Mutex<VecDeque<ResultOf<P>>>,
  space_freed: Notify,
  results_available: Signal,
  lifecycle: Lifecycle,
}

/// A bounded-queue, single-worker processing unit.
///
/// Cloning a stage yields another handle to the same queue and worker.
pub struct Stage<P: Processor> {
  inner: Arc<StageInner<P>>,
}

impl<P: Processor> Clone for Stage<P> {
  fn clone(&self) -> Self {
    Stage {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<P: Processor> Stage<P> {
  pub fn new(name: impl Into<String>, processor: P, max_queue_length: usize) -> Self {
    Self {
      inner: Arc::new(StageInner {
        id: ChildId::next(),
        name: name.into(),
        processor,
        state: Mutex::new(QueueState {
          queue: VecDeque::new(),
          max_len: max_queue_length.max(1),
          running: false,
          in_flight: false,
          closed: false,
        }),
        results: Mutex::new(VecDeque::new()),
        space_freed: Notify::new(),
        results_available: Signal::new(),
        lifecycle: Lifecycle::new(),
      }),
    }
  }

  pub fn processor(&self) -> &P {
    &self.inner.processor
  }

  /// Signal fired after each result is buffered. Handlers must drain
  /// [`next_result`](Self::next_result) until it returns `None`.
  pub fn results_available(&self) -> &Signal {
    &self.inner.results_available
  }

  /// Enqueues a directive, waiting for room if the queue is full.
  ///
  /// Submitting into an idle stage launches its worker. Fails with
  /// `SluiceError::StageCancelled` if the stage is cancelled or faulted, including
  /// when that happens while this call is waiting for room.
  pub async fn submit(&self, directive: P::Directive) -> SluiceResult<()> {
    loop {
      let space_freed = self.inner.space_freed.notified();
      {
        let mut state = self.inner.state.lock();
        if state.closed {
          return Err(SluiceError::StageCancelled {
            stage: self.inner.name.clone(),
          });
        }
        if state.queue.len() < state.max_len {
          state.queue.push_back(directive);
          let launch = !state.running;
          state.running = true;
          drop(state);
          if launch {
            self.launch_worker();
          }
          return Ok(());
        }
      }
      event!(Level::TRACE, stage = %self.inner.name, "Queue full, waiting for room.");
      space_freed.await;
    }
  }

  /// Takes the oldest unconsumed result. Never blocks.
  pub fn next_result(&self) -> Option<ResultOf<P>> {
    self.inner.results.lock().pop_front()
  }

  pub fn queued(&self) -> usize {
    self.inner.state.lock().queue.len()
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.state.lock().closed
  }

  fn launch_worker(&self) {
    event!(Level::DEBUG, stage = %self.inner.name, "Worker launched.");
    self.inner.lifecycle.emit(&LifecycleEvent::Started);
    tokio::spawn(run_worker(Arc::clone(&self.inner)));
  }
}

async fn run_worker<P: Processor>(inner: Arc<StageInner<P>>) {
  let failure = loop {
    let directive = {
      let mut state = inner.state.lock();
      match state.queue.pop_front() {
        Some(directive) => {
          state.in_flight = true;
          directive
        }
        None => {
          state.running = false;
          break None;
        }
      }
    };
    inner.space_freed.notify_waiters();

    // Each directive runs in its own task so a panicking processor surfaces as a
    // JoinError instead of silently killing the worker.
    let task_inner = Arc::clone(&inner);
    let processed = tokio::spawn(async move { task_inner.processor.process(directive).await }).await;

    match processed {
      Ok(Ok(result)) => {
        let delivered = {
          let mut state = inner.state.lock();
          state.in_flight = false;
          // A stage cancelled mid-directive hands nothing downstream.
          if !state.closed {
            inner.results.lock().push_back(result);
          }
          !state.closed
        };
        if delivered {
          inner.results_available.fire().await;
        } else {
          event!(Level::DEBUG, stage = %inner.name, "Stage cancelled while processing, result dropped.");
        }
      }
      Ok(Err(source)) => {
        event!(Level::ERROR, stage = %inner.name, error = %source, "Fatal processing failure, stopping stage.");
        break Some(SluiceError::StageFailed {
          stage: inner.name.clone(),
          source,
        });
      }
      Err(join_error) => {
        event!(Level::ERROR, stage = %inner.name, error = %join_error, "Processor panicked, stopping stage.");
        break Some(SluiceError::StagePanicked {
          stage: inner.name.clone(),
          message: join_error.to_string(),
        });
      }
    }
  };

  if failure.is_some() {
    let mut state = inner.state.lock();
    state.queue.clear();
    state.in_flight = false;
    state.running = false;
    state.closed = true;
    drop(state);
    inner.space_freed.notify_waiters();
  }

  event!(Level::DEBUG, stage = %inner.name, failed = failure.is_some(), "Worker stopped.");
  inner.lifecycle.emit(&LifecycleEvent::Stopped(failure.map(Arc::new)));
}

impl<P: Processor> ChildStage for Stage<P> {
  fn id(&self) -> ChildId {
    self.inner.id
  }

  fn name(&self) -> &str {
    &self.inner.name
  }

  fn is_busy(&self) -> bool {
    let busy = {
      let state = self.inner.state.lock();
      state.running || state.in_flight || !state.queue.is_empty()
    };
    busy || !self.inner.results.lock().is_empty()
  }

  fn start(&self) {
    let launch = {
      let mut state = self.inner.state.lock();
      state.closed = false;
      let launch = !state.running;
      state.running = true;
      launch
    };
    if launch {
      self.launch_worker();
    }
  }

  fn cancel(&self) {
    let dropped = {
      let mut state = self.inner.state.lock();
      state.closed = true;
      let dropped = state.queue.len();
      state.queue.clear();
      dropped
    };
    let discarded = {
      let mut results = self.inner.results.lock();
      let discarded = results.len();
      results.clear();
      discarded
    };
    self.inner.space_freed.notify_waiters();
    event!(Level::DEBUG, stage = %self.inner.name, dropped, discarded, "Stage cancelled.");
  }

  fn reset(&self) {
    {
      let mut state = self.inner.state.lock();
      state.closed = false;
      state.queue.clear();
    }
    self.inner.results.lock().clear();
    self.inner.space_freed.notify_waiters();
  }

  fn max_queue_length(&self) -> usize {
    self.inner.state.lock().max_len
  }

  fn set_max_queue_length(&self, max_queue_length: usize) {
    self.inner.state.lock().max_len = max_queue_length.max(1);
    self.inner.space_freed.notify_waiters();
  }

  fn lifecycle(&self) -> &Lifecycle {
    &self.inner.lifecycle
  }
}
