// sluice/src/process/controller.rs

//! Defines `ProcessController`, a finite-state machine that owns a set of child
//! stages and moves between lifecycle states when its triggers fire.

use crate::core::notify::{Observers, SubscriptionId};
use crate::error::{SluiceError, SluiceResult};
use crate::process::child::{ChildId, ChildStage, LifecycleEvent};
use crate::process::state::{ProcessState, Role};
use crate::process::trigger::{StateTrigger, StopContext, StopPredicate};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Notify};
use tracing::{event, Level};

/// A transition the controller went through.
///
/// `error` is only populated on the transition into the terminal state, and holds
/// the first fatal error any child reported during the run.
#[derive(Debug, Clone)]
pub struct StateChange {
  pub from: ProcessState,
  pub to: ProcessState,
  pub error: Option<Arc<SluiceError>>,
}

/// A child lifecycle notification, as re-published by the controller.
#[derive(Debug, Clone)]
pub struct ChildEvent {
  pub child: ChildId,
  pub name: String,
  pub role: Role,
  pub event: LifecycleEvent,
}

struct RegisteredChild {
  role: Role,
  child: Arc<dyn ChildStage>,
  subscription: SubscriptionId,
}

struct ControllerInner {
  name: String,
  initial: ProcessState,
  terminal: ProcessState,
  // The sender doubles as the storage of the current state.
  state_tx: watch::Sender<ProcessState>,
  // Serializes transitions together with the notification of their observers.
  transition_lock: Mutex<()>,
  children: RwLock<Vec<RegisteredChild>>,
  triggers: RwLock<Vec<StateTrigger>>,
  run_error: Mutex<Option<Arc<SluiceError>>>,
  // Woken on every child `Stopped` notification.
  child_stopped: Notify,
  state_observers: Observers<StateChange>,
  child_observers: Observers<ChildEvent>,
}

/// Owns child stages by role and evaluates state triggers on their notifications.
///
/// Cloning a controller yields another handle to the same state machine.
///
/// Observers registered through [`on_state_changed`](Self::on_state_changed) run while
/// the transition lock is held, so they must not call [`transition_to`](Self::transition_to),
/// [`abort`](Self::abort) or [`reset`](Self::reset).
#[derive(Clone)]
pub struct ProcessController {
  inner: Arc<ControllerInner>,
}

impl ProcessController {
  pub fn new(name: impl Into<String>, initial: ProcessState, terminal: ProcessState) -> Self {
    let (state_tx, _) = watch::channel(initial);
    Self {
      inner: Arc::new(ControllerInner {
        name: name.into(),
        initial,
        terminal,
        state_tx,
        transition_lock: Mutex::new(()),
        children: RwLock::new(Vec::new()),
        triggers: RwLock::new(Vec::new()),
        run_error: Mutex::new(None),
        child_stopped: Notify::new(),
        state_observers: Observers::new(),
        child_observers: Observers::new(),
      }),
    }
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  pub fn state(&self) -> ProcessState {
    *self.inner.state_tx.borrow()
  }

  pub fn initial_state(&self) -> ProcessState {
    self.inner.initial
  }

  pub fn terminal_state(&self) -> ProcessState {
    self.inner.terminal
  }

  /// The first fatal error reported by a child since the last reset.
  pub fn run_error(&self) -> Option<Arc<SluiceError>> {
    self.inner.run_error.lock().clone()
  }

  pub fn subscribe_state(&self) -> watch::Receiver<ProcessState> {
    self.inner.state_tx.subscribe()
  }

  pub fn on_state_changed(&self, observer: impl Fn(&StateChange) + Send + Sync + 'static) -> SubscriptionId {
    self.inner.state_observers.subscribe(observer)
  }

  pub fn remove_state_observer(&self, id: SubscriptionId) -> bool {
    self.inner.state_observers.unsubscribe(id)
  }

  pub fn on_child_event(&self, observer: impl Fn(&ChildEvent) + Send + Sync + 'static) -> SubscriptionId {
    self.inner.child_observers.subscribe(observer)
  }

  pub fn remove_child_observer(&self, id: SubscriptionId) -> bool {
    self.inner.child_observers.unsubscribe(id)
  }

  /// Adds a child and wires its lifecycle notifications into trigger evaluation.
  pub fn register_child(&self, role: Role, child: Arc<dyn ChildStage>) -> SluiceResult<()> {
    let id = child.id();
    let mut children = self.inner.children.write();
    if children.iter().any(|c| c.child.id() == id) {
      return Err(SluiceError::ConfigurationError {
        message: format!(
          "child '{}' ({}) is already registered with controller '{}'",
          child.name(),
          id,
          self.inner.name
        ),
      });
    }

    let weak: Weak<ControllerInner> = Arc::downgrade(&self.inner);
    let subscription = child.lifecycle().subscribe(move |lifecycle_event: &LifecycleEvent| {
      if let Some(inner) = weak.upgrade() {
        inner.handle_child_event(id, lifecycle_event);
      }
    });
    event!(Level::DEBUG, controller = %self.inner.name, child = %child.name(), child_id = %id, ?role, "Child registered.");
    children.push(RegisteredChild {
      role,
      child,
      subscription,
    });
    Ok(())
  }

  /// Removes a child. Returns `false` if it was not registered.
  pub fn deregister_child(&self, id: ChildId) -> bool {
    let removed = {
      let mut children = self.inner.children.write();
      match children.iter().position(|c| c.child.id() == id) {
        Some(idx) => Some(children.remove(idx)),
        None => None,
      }
    };
    match removed {
      Some(entry) => {
        entry.child.lifecycle().unsubscribe(entry.subscription);
        event!(Level::DEBUG, controller = %self.inner.name, child = %entry.child.name(), child_id = %id, "Child deregistered.");
        true
      }
      None => false,
    }
  }

  pub fn children(&self) -> Vec<(Role, Arc<dyn ChildStage>)> {
    self.inner.snapshot_children()
  }

  pub fn register_trigger(&self, trigger: StateTrigger) {
    event!(Level::TRACE, controller = %self.inner.name, ?trigger, "Trigger registered.");
    self.inner.triggers.write().push(trigger);
  }

  /// Starts every Producer child, in registration order. State advances through
  /// the children's own `Started` notifications, not through this call.
  pub fn start(&self) -> usize {
    let producers: Vec<Arc<dyn ChildStage>> = self
      .inner
      .children
      .read()
      .iter()
      .filter(|c| c.role == Role::Producer)
      .map(|c| Arc::clone(&c.child))
      .collect();
    event!(Level::INFO, controller = %self.inner.name, producers = producers.len(), "Starting producers.");
    for producer in &producers {
      producer.start();
    }
    producers.len()
  }

  /// Resets every registered child.
  pub fn reset_children(&self) {
    for (_, child) in self.inner.snapshot_children() {
      child.reset();
    }
  }

  /// Cancels every registered child.
  pub fn cancel_children(&self) {
    for (_, child) in self.inner.snapshot_children() {
      child.cancel();
    }
  }

  /// Moves the controller to `target` if the transition table allows it.
  /// Moving to the current state is a no-op.
  pub fn transition_to(&self, target: ProcessState) -> SluiceResult<()> {
    let from = self.state();
    if from == target || self.inner.apply(target) {
      return Ok(());
    }
    Err(SluiceError::InvalidTransition { from, to: target })
  }

  /// Forces the controller into its terminal state, recording `error` as the run error.
  pub fn abort(&self, error: Arc<SluiceError>) {
    self.inner.record_error(&error);
    let _guard = self.inner.transition_lock.lock();
    let from = self.state();
    if from == self.inner.terminal {
      return;
    }
    self.inner.state_tx.send_replace(self.inner.terminal);
    event!(Level::WARN, controller = %self.inner.name, ?from, error = %error, "Controller aborted.");
    self.inner.state_observers.emit(&StateChange {
      from,
      to: self.inner.terminal,
      error: self.run_error(),
    });
  }

  /// Returns the controller to its initial state and forgets the last run error.
  pub fn reset(&self) {
    let _guard = self.inner.transition_lock.lock();
    *self.inner.run_error.lock() = None;
    let from = self.state();
    if from == self.inner.initial {
      return;
    }
    self.inner.state_tx.send_replace(self.inner.initial);
    event!(Level::DEBUG, controller = %self.inner.name, ?from, "Controller reset.");
    self.inner.state_observers.emit(&StateChange {
      from,
      to: self.inner.initial,
      error: None,
    });
  }

  /// Names of the registered children that still report work.
  pub fn busy_children(&self) -> Vec<String> {
    self
      .inner
      .snapshot_children()
      .iter()
      .filter(|(_, child)| child.is_busy())
      .map(|(_, child)| child.name().to_string())
      .collect()
  }

  /// Resolves once no registered child is busy, re-checking on every child stop.
  ///
  /// The terminal state can be reached while cancelled children still finish their
  /// in-flight work; this is what waits for that work.
  pub async fn wait_for_idle_children(&self) {
    loop {
      let stopped = self.inner.child_stopped.notified();
      let busy = self.busy_children();
      if busy.is_empty() {
        return;
      }
      event!(Level::TRACE, controller = %self.inner.name, ?busy, "Waiting for children to go idle.");
      stopped.await;
    }
  }

  /// Resolves once the controller reaches its terminal state.
  pub async fn wait_for_terminal(&self) -> SluiceResult<ProcessState> {
    let terminal = self.inner.terminal;
    let mut rx = self.inner.state_tx.subscribe();
    let state = *rx
      .wait_for(|state| *state == terminal)
      .await
      .map_err(|_| SluiceError::Internal(format!("state channel of '{}' closed", self.inner.name)))?;
    Ok(state)
  }
}

impl ControllerInner {
  fn snapshot_children(&self) -> Vec<(Role, Arc<dyn ChildStage>)> {
    self
      .children
      .read()
      .iter()
      .map(|c| (c.role, Arc::clone(&c.child)))
      .collect()
  }

  fn record_error(&self, error: &Arc<SluiceError>) {
    let mut run_error = self.run_error.lock();
    if run_error.is_none() {
      *run_error = Some(Arc::clone(error));
    }
  }

  fn apply(&self, target: ProcessState) -> bool {
    let _guard = self.transition_lock.lock();
    let from = *self.state_tx.borrow();
    if from == target {
      return false;
    }
    if !from.can_transition_to(target) {
      event!(Level::DEBUG, controller = %self.name, ?from, to = ?target, "Transition rejected.");
      return false;
    }
    self.state_tx.send_replace(target);
    event!(Level::INFO, controller = %self.name, ?from, to = ?target, "State changed.");
    let error = if target == self.terminal {
      self.run_error.lock().clone()
    } else {
      None
    };
    self.state_observers.emit(&StateChange { from, to: target, error });
    true
  }

  fn handle_child_event(&self, id: ChildId, lifecycle_event: &LifecycleEvent) {
    let children = self.snapshot_children();
    let Some((role, child)) = children.iter().find(|(_, c)| c.id() == id).cloned() else {
      // Deregistered between emission and delivery.
      return;
    };

    self.child_observers.emit(&ChildEvent {
      child: id,
      name: child.name().to_string(),
      role,
      event: lifecycle_event.clone(),
    });

    let triggers = self.triggers.read().clone();
    match lifecycle_event {
      LifecycleEvent::Started => {
        event!(Level::DEBUG, controller = %self.name, child = %child.name(), "Child started.");
        for trigger in &triggers {
          if let StateTrigger::OnStart { child: bound, target } = trigger {
            if *bound == id {
              self.apply(*target);
            }
          }
        }
      }
      LifecycleEvent::Stopped(error) => {
        match error {
          Some(err) => {
            event!(Level::ERROR, controller = %self.name, child = %child.name(), error = %err, "Child stopped with error.");
            self.record_error(err);
          }
          None => event!(Level::DEBUG, controller = %self.name, child = %child.name(), "Child stopped."),
        }

        let ctx = StopContext {
          child: &child,
          error: error.as_ref(),
          children: &children,
        };
        let mut verdicts: Vec<(StopPredicate, bool)> = Vec::new();
        for trigger in &triggers {
          if let StateTrigger::OnStop { predicate, target } = trigger {
            let fired = match verdicts.iter().find(|(p, _)| Arc::ptr_eq(p, predicate)) {
              Some((_, verdict)) => *verdict,
              None => {
                let verdict = predicate(&ctx);
                verdicts.push((Arc::clone(predicate), verdict));
                verdict
              }
            };
            if fired {
              self.apply(*target);
            }
          }
        }
        self.child_stopped.notify_waiters();
      }
    }
  }
}
