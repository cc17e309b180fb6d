// sluice/src/pipeline/mod.rs

//! Defines the `Pipeline<I, E>` struct: component registration, the run API and
//! its notifications.

pub mod definition;
pub mod execution;
pub mod hooks;

pub use definition::{ConversionFailure, PersistenceFailure, Pipeline};
pub use execution::RunSummary;
