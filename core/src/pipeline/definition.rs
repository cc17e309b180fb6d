// sluice/src/pipeline/definition.rs

//! Contains the `Pipeline<I, E>` struct definition, its construction, and the
//! registration of the components a run needs (converter, adapter, source proxies).

use crate::config::{CounterPolicy, PipelineConfig};
use crate::core::notify::{Observers, SubscriptionId};
use crate::core::strategy::{AdapterFactory, Converter, PersistenceAdapter, TargetCommand};
use crate::error::{SluiceError, SluiceResult, StrategyError};
use crate::pipeline::execution::completion_predicate;
use crate::process::child::ChildStage;
use crate::process::controller::ProcessController;
use crate::process::state::{ProcessState, Role};
use crate::process::trigger::StateTrigger;
use crate::source::SourceProxy;
use crate::stage::conversion::{conversion_stage, ConversionStage};
use crate::stage::persistence::{persistence_stage, PersistenceCounters, PersistenceStage};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{event, Level};

/// Reported when an item could not be converted. The pipeline carries on.
#[derive(Debug)]
pub struct ConversionFailure<I> {
  pub item: I,
  pub error: StrategyError,
}

/// Reported when an entity was rolled back. `error` is `None` when the adapter
/// itself classified the entity as `PersistOutcome::Rollback`.
#[derive(Debug)]
pub struct PersistenceFailure<E> {
  pub entity: E,
  pub error: Option<StrategyError>,
}

pub(crate) struct RegisteredProxy<I> {
  pub(crate) proxy: Arc<dyn SourceProxy<I>>,
  pub(crate) subscription: SubscriptionId,
}

/// Everything `register_components` swaps in as one unit.
pub(crate) struct Components<I, E: Send + Sync + 'static> {
  pub(crate) converter: Arc<dyn Converter<I, E>>,
  pub(crate) adapter: Arc<dyn PersistenceAdapter<E>>,
  pub(crate) proxies: Vec<RegisteredProxy<I>>,
}

#[derive(Default)]
pub(crate) struct TargetCommands {
  pub(crate) preparation: Option<Arc<dyn TargetCommand>>,
  pub(crate) finalization: Option<Arc<dyn TargetCommand>>,
}

pub(crate) struct PipelineShared<I, E>
where
  I: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  pub(crate) name: String,
  pub(crate) counter_policy: CounterPolicy,
  pub(crate) controller: ProcessController,
  pub(crate) conversion: ConversionStage<I, E>,
  pub(crate) persistence: PersistenceStage<E>,
  pub(crate) counters: Arc<PersistenceCounters>,
  pub(crate) components: Mutex<Option<Components<I, E>>>,
  pub(crate) max_queue_length: AtomicUsize,
  pub(crate) commands: Mutex<TargetCommands>,
  pub(crate) conversion_failed: Observers<ConversionFailure<I>>,
  pub(crate) persistence_failed: Observers<PersistenceFailure<E>>,
  pub(crate) conversion_failures: AtomicU64,
  pub(crate) persistence_failures: AtomicU64,
  pub(crate) cancel_requested: AtomicBool,
  // Held by the `start` call currently setting up a run.
  pub(crate) starting: AtomicBool,
}

/// Extract, convert, persist.
///
/// Source proxies (Producer role) feed a conversion stage (Producer role), which feeds
/// a persistence stage (Consumer role). A process controller moves the pipeline from
/// `NotStarted` to `Started` when the conversion stage starts, and to `Completed` and
/// `Stopped` once every stage is idle, or as soon as any stage fails fatally (in which
/// case every stage is cancelled first).
///
/// A pipeline is built once per integration job and reused across runs: deregister the
/// old components, register new ones, run again. Cloning yields another handle to the
/// same pipeline.
pub struct Pipeline<I, E>
where
  I: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  pub(crate) shared: Arc<PipelineShared<I, E>>,
}

impl<I, E> Clone for Pipeline<I, E>
where
  I: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<I, E> Pipeline<I, E>
where
  I: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  /// Creates a pipeline and wires its two stages and its state triggers.
  pub fn new(name: impl Into<String>, config: PipelineConfig) -> Self {
    let name = name.into();
    let max_queue_length = config.max_queue_length.max(1);
    let counters = Arc::new(PersistenceCounters::new());
    let conversion = conversion_stage(format!("{}/conversion", name), max_queue_length);
    let persistence = persistence_stage(format!("{}/persistence", name), Arc::clone(&counters), max_queue_length);
    let controller = ProcessController::new(name.clone(), ProcessState::NotStarted, ProcessState::Stopped);

    let shared = Arc::new(PipelineShared {
      name,
      counter_policy: config.counter_policy,
      controller,
      conversion,
      persistence,
      counters,
      components: Mutex::new(None),
      max_queue_length: AtomicUsize::new(max_queue_length),
      commands: Mutex::new(TargetCommands::default()),
      conversion_failed: Observers::new(),
      persistence_failed: Observers::new(),
      conversion_failures: AtomicU64::new(0),
      persistence_failures: AtomicU64::new(0),
      cancel_requested: AtomicBool::new(false),
      starting: AtomicBool::new(false),
    });

    let weak: Weak<PipelineShared<I, E>> = Arc::downgrade(&shared);
    shared.conversion.results_available().subscribe(move || {
      let weak = weak.clone();
      async move {
        if let Some(shared) = weak.upgrade() {
          shared.forward_conversion_results().await;
        }
      }
    });

    let weak: Weak<PipelineShared<I, E>> = Arc::downgrade(&shared);
    shared.persistence.results_available().subscribe(move || {
      let weak = weak.clone();
      async move {
        if let Some(shared) = weak.upgrade() {
          shared.drain_persistence_results();
        }
      }
    });

    let completion = completion_predicate();
    let controller = &shared.controller;
    controller.register_trigger(StateTrigger::on_start(shared.conversion.id(), ProcessState::Started));
    controller.register_trigger(StateTrigger::on_stop(Arc::clone(&completion), ProcessState::Completed));
    controller.register_trigger(StateTrigger::on_stop(completion, ProcessState::Stopped));

    event!(Level::DEBUG, pipeline = %shared.name, max_queue_length, "Pipeline created.");
    Self { shared }
  }

  pub fn name(&self) -> &str {
    &self.shared.name
  }

  pub fn state(&self) -> ProcessState {
    self.shared.controller.state()
  }

  pub fn controller(&self) -> &ProcessController {
    &self.shared.controller
  }

  pub fn conversion_stage(&self) -> &ConversionStage<I, E> {
    &self.shared.conversion
  }

  pub fn persistence_stage(&self) -> &PersistenceStage<E> {
    &self.shared.persistence
  }

  pub fn is_registered(&self) -> bool {
    self.shared.components.lock().is_some()
  }

  pub fn registered_proxies(&self) -> Vec<Arc<dyn SourceProxy<I>>> {
    self
      .shared
      .components
      .lock()
      .as_ref()
      .map(|c| c.proxies.iter().map(|p| Arc::clone(&p.proxy)).collect())
      .unwrap_or_default()
  }

  pub fn max_queue_length(&self) -> usize {
    self.shared.max_queue_length.load(Ordering::SeqCst)
  }

  /// Sets the single backpressure knob of the pipeline. 0 is clamped to 1.
  /// Applies to both stages and every currently registered proxy.
  pub fn set_max_queue_length(&self, max_queue_length: usize) {
    let max_queue_length = max_queue_length.max(1);
    let components = self.shared.components.lock();
    self.shared.max_queue_length.store(max_queue_length, Ordering::SeqCst);
    self.shared.conversion.set_max_queue_length(max_queue_length);
    self.shared.persistence.set_max_queue_length(max_queue_length);
    if let Some(components) = components.as_ref() {
      for registered in &components.proxies {
        registered.proxy.set_max_queue_length(max_queue_length);
      }
    }
    event!(Level::DEBUG, pipeline = %self.shared.name, max_queue_length, "Max queue length updated.");
  }

  /// Swaps in a converter, a persistence adapter and a set of source proxies as one unit.
  ///
  /// Any previously registered components are deregistered first. Fails without
  /// touching the current registration if a run is active or a proxy is listed twice.
  pub fn register_components(
    &self,
    converter: Arc<dyn Converter<I, E>>,
    adapter: Arc<dyn PersistenceAdapter<E>>,
    proxies: Vec<Arc<dyn SourceProxy<I>>>,
  ) -> SluiceResult<()> {
    let mut seen = HashSet::new();
    seen.insert(self.shared.conversion.id());
    seen.insert(self.shared.persistence.id());
    for proxy in &proxies {
      if !seen.insert(proxy.id()) {
        return Err(SluiceError::ConfigurationError {
          message: format!("proxy '{}' ({}) is listed more than once", proxy.name(), proxy.id()),
        });
      }
    }

    let mut components = self.shared.components.lock();
    self.ensure_inactive("register_components")?;
    if let Some(previous) = components.take() {
      self.shared.detach(previous);
    }

    let max_queue_length = self.max_queue_length();
    let controller = &self.shared.controller;
    let mut registered = Vec::with_capacity(proxies.len());
    for proxy in proxies {
      proxy.set_max_queue_length(max_queue_length);
      let subscription = self.shared.subscribe_feed(&proxy);
      controller.register_child(Role::Producer, Arc::clone(&proxy).into_child())?;
      registered.push(RegisteredProxy { proxy, subscription });
    }
    // Proxies are registered first so they are already busy when the conversion
    // stage starts and finds its queue empty.
    controller.register_child(Role::Producer, Arc::new(self.shared.conversion.clone()))?;
    controller.register_child(Role::Consumer, Arc::new(self.shared.persistence.clone()))?;

    self.shared.conversion.set_max_queue_length(max_queue_length);
    self.shared.persistence.set_max_queue_length(max_queue_length);
    self.shared.conversion.reset();
    self.shared.persistence.reset();
    if self.shared.counter_policy == CounterPolicy::ResetOnRegister {
      self.shared.counters.reset();
    }

    event!(Level::INFO, pipeline = %self.shared.name, proxies = registered.len(), "Components registered.");
    *components = Some(Components {
      converter,
      adapter,
      proxies: registered,
    });
    Ok(())
  }

  /// Builds the adapter through `factory`, then registers like
  /// [`register_components`](Self::register_components).
  pub fn register_with_factory(
    &self,
    converter: Arc<dyn Converter<I, E>>,
    factory: &dyn AdapterFactory<E>,
    proxies: Vec<Arc<dyn SourceProxy<I>>>,
  ) -> SluiceResult<()> {
    let adapter = factory.create().map_err(|source| SluiceError::AdapterLifecycle {
      operation: "create",
      source,
    })?;
    self.register_components(converter, adapter, proxies)
  }

  /// Releases the registered converter, adapter and proxies. A no-op if nothing is registered.
  pub fn deregister_components(&self) -> SluiceResult<()> {
    let mut components = self.shared.components.lock();
    self.ensure_inactive("deregister_components")?;
    if let Some(previous) = components.take() {
      self.shared.detach(previous);
      event!(Level::INFO, pipeline = %self.shared.name, "Components deregistered.");
    }
    Ok(())
  }

  fn ensure_inactive(&self, operation: &'static str) -> SluiceResult<()> {
    self.shared.ensure_inactive(operation)
  }
}

impl<I, E> PipelineShared<I, E>
where
  I: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  /// Subscribes the proxy's "items produced" signal to the conversion feed.
  fn subscribe_feed(self: &Arc<Self>, proxy: &Arc<dyn SourceProxy<I>>) -> SubscriptionId {
    let weak_shared: Weak<Self> = Arc::downgrade(self);
    let weak_proxy: Weak<dyn SourceProxy<I>> = Arc::downgrade(proxy);
    proxy.items_produced().subscribe(move || {
      let weak_shared = weak_shared.clone();
      let weak_proxy = weak_proxy.clone();
      async move {
        if let (Some(shared), Some(proxy)) = (weak_shared.upgrade(), weak_proxy.upgrade()) {
          shared.feed_conversion(proxy.as_ref()).await;
        }
      }
    })
  }

  /// Fails with `PipelineActive` while a run is being started, is under way, or
  /// still has children finishing work from a run that already reached `Stopped`.
  pub(crate) fn ensure_inactive(&self, operation: &'static str) -> SluiceResult<()> {
    if self.starting.load(Ordering::SeqCst) {
      return Err(SluiceError::PipelineActive {
        pipeline: self.name.clone(),
        state: self.controller.state(),
        operation,
      });
    }
    self.check_idle(operation)
  }

  /// Like [`ensure_inactive`](Self::ensure_inactive), for the caller holding the start claim.
  pub(crate) fn check_idle(&self, operation: &'static str) -> SluiceResult<()> {
    let state = self.controller.state();
    if state.is_active() {
      return Err(SluiceError::PipelineActive {
        pipeline: self.name.clone(),
        state,
        operation,
      });
    }
    let busy = self.controller.busy_children();
    if !busy.is_empty() {
      event!(Level::DEBUG, pipeline = %self.name, ?busy, operation, "Children still finishing the previous run.");
      return Err(SluiceError::PipelineActive {
        pipeline: self.name.clone(),
        state,
        operation,
      });
    }
    Ok(())
  }

  fn detach(&self, components: Components<I, E>) {
    for registered in components.proxies {
      registered.proxy.items_produced().unsubscribe(registered.subscription);
      self.controller.deregister_child(registered.proxy.id());
    }
    self.controller.deregister_child(self.conversion.id());
    self.controller.deregister_child(self.persistence.id());
    self.conversion.reset();
    self.persistence.reset();
  }
}
