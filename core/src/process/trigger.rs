// sluice/src/process/trigger.rs

//! Declarative rules mapping child lifecycle notifications to controller transitions.

use crate::error::SluiceError;
use crate::process::child::{ChildId, ChildStage};
use crate::process::state::{ProcessState, Role};
use std::sync::Arc;

/// What a stop-bound predicate gets to look at.
pub struct StopContext<'a> {
  /// The child whose `Stopped` notification is being evaluated.
  pub child: &'a Arc<dyn ChildStage>,
  /// The error the child stopped with, if any.
  pub error: Option<&'a Arc<SluiceError>>,
  /// Every child registered with the controller at the time of the notification.
  pub children: &'a [(Role, Arc<dyn ChildStage>)],
}

/// Predicate deciding whether a stop notification fires a stop-bound trigger.
///
/// Several triggers may share one predicate (same `Arc`); the controller then
/// evaluates it once per notification and reuses the answer.
pub type StopPredicate = Arc<dyn Fn(&StopContext<'_>) -> bool + Send + Sync + 'static>;

#[derive(Clone)]
pub enum StateTrigger {
  /// Transition to `target` when the child identified by `child` emits `Started`.
  OnStart { child: ChildId, target: ProcessState },
  /// Transition to `target` when any child emits `Stopped` and `predicate` holds.
  OnStop { predicate: StopPredicate, target: ProcessState },
}

impl StateTrigger {
  pub fn on_start(child: ChildId, target: ProcessState) -> Self {
    StateTrigger::OnStart { child, target }
  }

  pub fn on_stop(predicate: StopPredicate, target: ProcessState) -> Self {
    StateTrigger::OnStop { predicate, target }
  }

  pub fn target(&self) -> ProcessState {
    match self {
      StateTrigger::OnStart { target, .. } | StateTrigger::OnStop { target, .. } => *target,
    }
  }
}

impl std::fmt::Debug for StateTrigger {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      StateTrigger::OnStart { child, target } => f
        .debug_struct("OnStart")
        .field("child", child)
        .field("target", target)
        .finish(),
      StateTrigger::OnStop { target, .. } => f.debug_struct("OnStop").field("target", target).finish(),
    }
  }
}
