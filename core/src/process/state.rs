// sluice/src/process/state.rs

//! Lifecycle states of a process controller and the roles of its children.

/// Lifecycle state of a [`ProcessController`](crate::process::ProcessController).
///
/// The order of the variants is the order a run moves through them.
/// `PreparingTarget`/`TargetPrepared` are only visited when a preparation command is
/// configured on the pipeline. `FinalizingTarget` is an extension point: nothing in
/// the crate transitions into it, but the transition table accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ProcessState {
  #[default]
  NotStarted,
  PreparingTarget,
  TargetPrepared,
  Started,
  Completed,
  FinalizingTarget,
  Stopped,
}

impl ProcessState {
  /// Whether a trigger may move the controller from `self` to `target`.
  pub fn can_transition_to(self, target: ProcessState) -> bool {
    use ProcessState::*;
    matches!(
      (self, target),
      (NotStarted, PreparingTarget)
        | (NotStarted, Started)
        | (PreparingTarget, TargetPrepared)
        | (TargetPrepared, Started)
        | (Started, Completed)
        | (Completed, FinalizingTarget)
        | (Completed, Stopped)
        | (FinalizingTarget, Stopped)
    )
  }

  /// A run is active between leaving `NotStarted` and reaching `Stopped`.
  pub fn is_active(self) -> bool {
    !matches!(self, ProcessState::NotStarted | ProcessState::Stopped)
  }
}

/// Classification of a child registered with a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
  /// Started by `ProcessController::start` and part of idle detection.
  Producer,
  /// Started on demand by upstream submissions; part of idle detection.
  Consumer,
  /// Neither auto-started nor considered for idle detection.
  Auxiliary,
}

impl Role {
  pub fn participates_in_idle_detection(self) -> bool {
    !matches!(self, Role::Auxiliary)
  }
}
