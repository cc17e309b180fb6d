// tests/common/mod.rs
#![allow(dead_code)] // Allow unused code in this common test module

use async_trait::async_trait;
use parking_lot::Mutex;
use sluice::{
  ChildId, ChildStage, Converter, ExtractionProxy, ItemSink, IterSource, LifecycleEvent, PersistOutcome,
  PersistenceAdapter, ProcessState, SluiceError, Source, SourceProxy, StateChange, StrategyError, TargetCommand,
};
use sluice::core::notify::Signal;
use sluice::process::child::Lifecycle;
use std::sync::{
  atomic::{AtomicBool, AtomicUsize, Ordering},
  Arc,
};
use std::time::Duration;
use tracing::Level;

// --- Converters ---

pub fn doubling_converter() -> Arc<dyn Converter<i32, i64>> {
  Arc::new(|item: &i32| -> Result<Option<i64>, StrategyError> { Ok(Some(i64::from(*item) * 2)) })
}

/// Doubles every item except `bad`, which fails with a recoverable validation error.
pub fn converter_rejecting(bad: i32) -> Arc<dyn Converter<i32, i64>> {
  Arc::new(move |item: &i32| -> Result<Option<i64>, StrategyError> {
    if *item == bad {
      return Err(StrategyError::validation(format!("item {} is not allowed", item)));
    }
    Ok(Some(i64::from(*item) * 2))
  })
}

/// Doubles every item except `bad`, for which it produces nothing.
pub fn converter_skipping(bad: i32) -> Arc<dyn Converter<i32, i64>> {
  Arc::new(move |item: &i32| -> Result<Option<i64>, StrategyError> {
    if *item == bad {
      Ok(None)
    } else {
      Ok(Some(i64::from(*item) * 2))
    }
  })
}

/// Doubles every item except `bad`, which fails fatally.
pub fn converter_fatal_on(bad: i32) -> Arc<dyn Converter<i32, i64>> {
  Arc::new(move |item: &i32| -> Result<Option<i64>, StrategyError> {
    if *item == bad {
      return Err(StrategyError::fatal(format!("cannot convert {}", item)));
    }
    Ok(Some(i64::from(*item) * 2))
  })
}

// --- Persistence adapter ---

/// Records every entity it sees. Configurable to roll back, fail recoverably or
/// fail fatally on a given entity, and to slow down each call.
#[derive(Default)]
pub struct RecordingAdapter {
  pub persisted: Mutex<Vec<i64>>,
  pub rollback_on: Option<i64>,
  pub reject_on: Option<i64>,
  pub fatal_on: Option<i64>,
  pub delay: Option<Duration>,
  pub opened: AtomicUsize,
  pub closed: AtomicUsize,
  pub fail_open: bool,
  pub in_flight: AtomicUsize,
  pub closed_while_persisting: AtomicBool,
}

impl RecordingAdapter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn persisted(&self) -> Vec<i64> {
    self.persisted.lock().clone()
  }

  pub fn is_persisting(&self) -> bool {
    self.in_flight.load(Ordering::SeqCst) > 0
  }

  async fn persist_one(&self, entity: i64) -> Result<PersistOutcome, StrategyError> {
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    if self.fatal_on == Some(entity) {
      return Err(StrategyError::fatal(format!("store crashed on {}", entity)));
    }
    if self.reject_on == Some(entity) {
      return Err(StrategyError::business_rule(format!("duplicate key {}", entity)));
    }
    if self.rollback_on == Some(entity) {
      return Ok(PersistOutcome::Rollback);
    }
    self.persisted.lock().push(entity);
    Ok(PersistOutcome::Added)
  }
}

#[async_trait]
impl PersistenceAdapter<i64> for RecordingAdapter {
  async fn open(&self) -> Result<(), StrategyError> {
    self.opened.fetch_add(1, Ordering::SeqCst);
    if self.fail_open {
      return Err(StrategyError::access("target unreachable"));
    }
    Ok(())
  }

  async fn close(&self) -> Result<(), StrategyError> {
    if self.is_persisting() {
      self.closed_while_persisting.store(true, Ordering::SeqCst);
    }
    self.closed.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  async fn persist(&self, entity: &i64) -> Result<PersistOutcome, StrategyError> {
    self.in_flight.fetch_add(1, Ordering::SeqCst);
    let outcome = self.persist_one(*entity).await;
    self.in_flight.fetch_sub(1, Ordering::SeqCst);
    outcome
  }
}

// --- Sources and proxies ---

pub fn proxy_over(name: &str, items: impl IntoIterator<Item = i32>) -> Arc<dyn SourceProxy<i32>> {
  Arc::new(ExtractionProxy::new(name, IterSource::new(items)))
}

/// Pushes an increasing sequence until the proxy is cancelled.
pub struct EndlessSource {
  pub pause: Duration,
}

#[async_trait]
impl Source for EndlessSource {
  type Item = i32;

  async fn extract(&self, sink: &ItemSink<i32>) -> Result<(), StrategyError> {
    let mut next = 0;
    loop {
      if !sink.push(next).await {
        return Ok(());
      }
      next += 1;
      tokio::time::sleep(self.pause).await;
    }
  }
}

/// Pushes `before_failure` items, then fails fatally.
pub struct FailingSource {
  pub before_failure: i32,
}

#[async_trait]
impl Source for FailingSource {
  type Item = i32;

  async fn extract(&self, sink: &ItemSink<i32>) -> Result<(), StrategyError> {
    for item in 0..self.before_failure {
      if !sink.push(item).await {
        return Ok(());
      }
    }
    Err(StrategyError::fatal("source connection lost"))
  }
}

/// Pushes `first`, then fails fatally as soon as `adapter` is inside a `persist` call.
pub struct FailWhilePersisting {
  pub first: i32,
  pub adapter: Arc<RecordingAdapter>,
}

#[async_trait]
impl Source for FailWhilePersisting {
  type Item = i32;

  async fn extract(&self, sink: &ItemSink<i32>) -> Result<(), StrategyError> {
    if !sink.push(self.first).await {
      return Ok(());
    }
    while !self.adapter.is_persisting() {
      tokio::time::sleep(Duration::from_millis(1)).await;
    }
    Err(StrategyError::fatal("source connection lost mid-write"))
  }
}

/// An `ExtractionProxy` that counts how often it is cancelled.
pub struct CountingProxy {
  inner: ExtractionProxy<i32>,
  pub cancels: AtomicUsize,
}

impl CountingProxy {
  pub fn new(name: &str, source: impl Source<Item = i32>) -> Arc<Self> {
    Arc::new(Self {
      inner: ExtractionProxy::new(name, source),
      cancels: AtomicUsize::new(0),
    })
  }

  pub fn cancels(&self) -> usize {
    self.cancels.load(Ordering::SeqCst)
  }
}

impl SourceProxy<i32> for CountingProxy {
  fn next_item(&self) -> Option<i32> {
    self.inner.next_item()
  }

  fn items_produced(&self) -> &Signal {
    self.inner.items_produced()
  }

  fn into_child(self: Arc<Self>) -> Arc<dyn ChildStage> {
    self
  }
}

impl ChildStage for CountingProxy {
  fn id(&self) -> ChildId {
    self.inner.id()
  }

  fn name(&self) -> &str {
    self.inner.name()
  }

  fn is_busy(&self) -> bool {
    self.inner.is_busy()
  }

  fn start(&self) {
    self.inner.start()
  }

  fn cancel(&self) {
    self.cancels.fetch_add(1, Ordering::SeqCst);
    self.inner.cancel()
  }

  fn reset(&self) {
    self.inner.reset()
  }

  fn max_queue_length(&self) -> usize {
    self.inner.max_queue_length()
  }

  fn set_max_queue_length(&self, max_queue_length: usize) {
    self.inner.set_max_queue_length(max_queue_length)
  }

  fn lifecycle(&self) -> &Lifecycle {
    self.inner.lifecycle()
  }
}

// --- A child driven by hand, for controller tests ---

pub struct ManualChild {
  id: ChildId,
  name: String,
  busy: AtomicBool,
  max_len: AtomicUsize,
  lifecycle: Lifecycle,
  pub log: Arc<Mutex<Vec<String>>>,
}

impl ManualChild {
  pub fn new(name: &str, log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
    Arc::new(Self {
      id: ChildId::next(),
      name: name.to_string(),
      busy: AtomicBool::new(false),
      max_len: AtomicUsize::new(1),
      lifecycle: Lifecycle::new(),
      log,
    })
  }

  pub fn set_busy(&self, busy: bool) {
    self.busy.store(busy, Ordering::SeqCst);
  }

  pub fn emit_started(&self) {
    self.busy.store(true, Ordering::SeqCst);
    self.lifecycle.emit(&LifecycleEvent::Started);
  }

  pub fn emit_stopped(&self, error: Option<SluiceError>) {
    self.busy.store(false, Ordering::SeqCst);
    self.lifecycle.emit(&LifecycleEvent::Stopped(error.map(Arc::new)));
  }
}

impl ChildStage for ManualChild {
  fn id(&self) -> ChildId {
    self.id
  }

  fn name(&self) -> &str {
    &self.name
  }

  fn is_busy(&self) -> bool {
    self.busy.load(Ordering::SeqCst)
  }

  fn start(&self) {
    self.log.lock().push(format!("start:{}", self.name));
  }

  fn cancel(&self) {
    self.log.lock().push(format!("cancel:{}", self.name));
  }

  fn reset(&self) {
    self.log.lock().push(format!("reset:{}", self.name));
  }

  fn max_queue_length(&self) -> usize {
    self.max_len.load(Ordering::SeqCst)
  }

  fn set_max_queue_length(&self, max_queue_length: usize) {
    self.max_len.store(max_queue_length.max(1), Ordering::SeqCst);
  }

  fn lifecycle(&self) -> &Lifecycle {
    &self.lifecycle
  }
}

// --- Target commands ---

pub struct RecordingCommand {
  pub name: String,
  pub runs: Arc<AtomicUsize>,
  pub fail: bool,
}

#[async_trait]
impl TargetCommand for RecordingCommand {
  fn name(&self) -> &str {
    &self.name
  }

  async fn execute(&self) -> anyhow::Result<()> {
    self.runs.fetch_add(1, Ordering::SeqCst);
    if self.fail {
      anyhow::bail!("{} could not reach the target", self.name);
    }
    Ok(())
  }
}

// --- Observation helpers ---

/// Collects every state a controller or pipeline moves into.
#[derive(Clone, Default)]
pub struct StateRecorder {
  pub changes: Arc<Mutex<Vec<StateChange>>>,
}

impl StateRecorder {
  pub fn observer(&self) -> impl Fn(&StateChange) + Send + Sync + 'static {
    let changes = Arc::clone(&self.changes);
    move |change: &StateChange| changes.lock().push(change.clone())
  }

  pub fn states(&self) -> Vec<ProcessState> {
    self.changes.lock().iter().map(|c| c.to).collect()
  }

  pub fn count(&self, state: ProcessState) -> usize {
    self.changes.lock().iter().filter(|c| c.to == state).count()
  }
}

/// Polls `condition` until it holds; panics after two seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
  let polled = tokio::time::timeout(Duration::from_secs(2), async {
    while !condition() {
      tokio::time::sleep(Duration::from_millis(2)).await;
    }
  })
  .await;
  assert!(polled.is_ok(), "condition not reached within two seconds");
}

// --- Helper for Tracing Setup (call once per test run if needed) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer() // Important for tests to capture output
    .try_init()
    .ok(); // Allow multiple initializations in tests (ok if fails)
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}
