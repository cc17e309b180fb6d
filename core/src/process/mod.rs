// sluice/src/process/mod.rs

//! The process controller: a state machine over a set of child stages.

pub mod child;
pub mod controller;
pub mod state;
pub mod trigger;

pub use child::{ChildId, ChildStage, Lifecycle, LifecycleEvent};
pub use controller::{ChildEvent, ProcessController, StateChange};
pub use state::{ProcessState, Role};
pub use trigger::{StateTrigger, StopContext, StopPredicate};
