// src/lib.rs

//! Sluice: an async, bounded-queue extract-convert-persist pipeline shell.
//!
//! Sluice moves items from one or more sources into a persistence target with
//! features like:
//!  - Pluggable converters and persistence adapters, swappable between runs.
//!  - Bounded stage queues that throttle every upstream producer (backpressure).
//!  - Recoverable per-item failures reported through notifications.
//!  - Fail-fast cancellation of every stage on the first fatal error.
//!  - A trigger-driven process controller that reports the run's lifecycle.

pub mod config;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod source;
pub mod stage;

// --- Re-exports for the Public API ---

pub use crate::config::{CounterPolicy, PipelineConfig, DEFAULT_MAX_QUEUE_LENGTH};
pub use crate::core::notify::{Observers, Signal, SubscriptionId};
pub use crate::core::result::{Outcome, StageResult};
pub use crate::core::strategy::{AdapterFactory, Converter, PersistOutcome, PersistenceAdapter, TargetCommand};
pub use crate::error::{FailureKind, SluiceError, SluiceResult, StrategyError};

pub use crate::pipeline::{ConversionFailure, PersistenceFailure, Pipeline, RunSummary};
pub use crate::process::{
  ChildEvent, ChildId, ChildStage, LifecycleEvent, ProcessController, ProcessState, Role, StateChange, StateTrigger,
  StopContext,
};
pub use crate::source::{ExtractionProxy, ItemSink, IterSource, Source, SourceProxy};
pub use crate::stage::{CounterSnapshot, PersistenceCounters, Processor, Stage};

/*
    Core Workflow:
    1. Implement `Converter<I, E>` (or pass a closure `Fn(&I) -> Result<Option<E>, StrategyError>`).
    2. Implement `PersistenceAdapter<E>` for your target store.
    3. Wrap each data source in an `ExtractionProxy<I>` (any `Source`, or an `IterSource`).
    4. Create a `Pipeline<I, E>` with a `PipelineConfig` (`PipelineConfig::from_env()` reads
       `SLUICE_MAX_QUEUE_LENGTH` and `SLUICE_COUNTER_POLICY`).
    5. Call `pipeline.register_components(converter, adapter, proxies)`.
    6. Subscribe to `on_conversion_failed` / `on_persistence_failed` for per-item failures.
    7. `pipeline.run().await` returns a `RunSummary`, or `SluiceError::RunFailed` if a stage
       failed fatally. To run again with other sources, register new components and run again.
*/
