// sluice/src/stage/mod.rs

//! Bounded-queue processing stages: the generic engine and its conversion and
//! persistence specializations.

pub mod conversion;
pub mod engine;
pub mod persistence;

pub use conversion::{conversion_stage, ConversionDirective, ConversionResult, ConversionStage, Converting};
pub use engine::{Processor, ResultOf, Stage};
pub use persistence::{
  persistence_stage, CounterSnapshot, PersistenceCounters, PersistenceDirective, PersistenceResult, PersistenceStage,
  Persisting,
};
