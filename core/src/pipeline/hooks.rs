// sluice/src/pipeline/hooks.rs

//! Contains the notification subscriptions of `Pipeline<I, E>` and the setters for
//! its preparation and finalization commands.

use crate::core::notify::SubscriptionId;
use crate::core::strategy::TargetCommand;
use crate::pipeline::definition::{ConversionFailure, PersistenceFailure, Pipeline};
use crate::process::controller::{ChildEvent, StateChange};
use std::sync::Arc;

impl<I, E> Pipeline<I, E>
where
  I: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  /// Called once per item the converter rejected with a recoverable error, or
  /// turned into no entity.
  pub fn on_conversion_failed(
    &self,
    observer: impl Fn(&ConversionFailure<I>) + Send + Sync + 'static,
  ) -> SubscriptionId {
    self.shared.conversion_failed.subscribe(observer)
  }

  pub fn remove_conversion_observer(&self, id: SubscriptionId) -> bool {
    self.shared.conversion_failed.unsubscribe(id)
  }

  /// Called once per entity whose persistence ended in `PersistOutcome::Rollback`.
  pub fn on_persistence_failed(
    &self,
    observer: impl Fn(&PersistenceFailure<E>) + Send + Sync + 'static,
  ) -> SubscriptionId {
    self.shared.persistence_failed.subscribe(observer)
  }

  pub fn remove_persistence_observer(&self, id: SubscriptionId) -> bool {
    self.shared.persistence_failed.unsubscribe(id)
  }

  pub fn on_state_changed(&self, observer: impl Fn(&StateChange) + Send + Sync + 'static) -> SubscriptionId {
    self.shared.controller.on_state_changed(observer)
  }

  pub fn remove_state_observer(&self, id: SubscriptionId) -> bool {
    self.shared.controller.remove_state_observer(id)
  }

  pub fn on_child_event(&self, observer: impl Fn(&ChildEvent) + Send + Sync + 'static) -> SubscriptionId {
    self.shared.controller.on_child_event(observer)
  }

  pub fn remove_child_observer(&self, id: SubscriptionId) -> bool {
    self.shared.controller.remove_child_observer(id)
  }

  /// Runs `command` before the producers start. A failure aborts the run.
  pub fn with_preparation(self, command: impl TargetCommand + 'static) -> Self {
    self.set_preparation(Some(Arc::new(command)));
    self
  }

  /// Runs `command` after a run stops without error or cancellation.
  pub fn with_finalization(self, command: impl TargetCommand + 'static) -> Self {
    self.set_finalization(Some(Arc::new(command)));
    self
  }

  pub fn set_preparation(&self, command: Option<Arc<dyn TargetCommand>>) {
    self.shared.commands.lock().preparation = command;
  }

  pub fn set_finalization(&self, command: Option<Arc<dyn TargetCommand>>) {
    self.shared.commands.lock().finalization = command;
  }
}
