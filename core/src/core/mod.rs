// sluice/src/core/mod.rs

//! Building blocks shared by the stages, the controller and the pipeline.

pub mod notify;
pub mod result;
pub mod strategy;

// Re-export key types for easier access from other sluice modules (and lib.rs)
pub use notify::{Observers, Signal, SubscriptionId};
pub use result::{Outcome, StageResult};
pub use strategy::{AdapterFactory, Converter, PersistOutcome, PersistenceAdapter, TargetCommand};
