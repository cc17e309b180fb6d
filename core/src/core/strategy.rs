// sluice/src/core/strategy.rs

//! Caller-supplied strategies: the converter, the persistence adapter and the
//! optional target preparation/finalization commands.

use crate::error::StrategyError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Converts one extracted item into the entity shape the persistence adapter stores.
///
/// Returning `Ok(None)` means the conversion produced nothing; the conversion stage
/// reports that as a recoverable business-rule failure for this item.
///
/// Implemented for any `Fn(&I) -> Result<Option<E>, StrategyError>`.
pub trait Converter<I, E>: Send + Sync {
  fn convert(&self, item: &I) -> Result<Option<E>, StrategyError>;
}

impl<I, E, F> Converter<I, E> for F
where
  F: Fn(&I) -> Result<Option<E>, StrategyError> + Send + Sync,
{
  fn convert(&self, item: &I) -> Result<Option<E>, StrategyError> {
    self(item)
  }
}

/// Classification of what happened to one entity in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistOutcome {
  Added,
  Modified,
  Unchanged,
  Removed,
  Rollback,
}

impl fmt::Display for PersistOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      PersistOutcome::Added => "added",
      PersistOutcome::Modified => "modified",
      PersistOutcome::Unchanged => "unchanged",
      PersistOutcome::Removed => "removed",
      PersistOutcome::Rollback => "rollback",
    };
    f.write_str(label)
  }
}

/// Storage side of the pipeline.
///
/// `open` is called once before producers start and `close` once after the run
/// stops. `persist` is called once per converted entity, sequentially, from the
/// persistence stage's worker.
#[async_trait]
pub trait PersistenceAdapter<E>: Send + Sync
where
  E: Send + Sync + 'static,
{
  async fn open(&self) -> Result<(), StrategyError> {
    Ok(())
  }

  async fn close(&self) -> Result<(), StrategyError> {
    Ok(())
  }

  async fn persist(&self, entity: &E) -> Result<PersistOutcome, StrategyError>;
}

/// Builds a persistence adapter at registration time.
///
/// Implemented for any `Fn() -> Result<Arc<dyn PersistenceAdapter<E>>, StrategyError>`.
pub trait AdapterFactory<E>: Send + Sync
where
  E: Send + Sync + 'static,
{
  fn create(&self) -> Result<Arc<dyn PersistenceAdapter<E>>, StrategyError>;
}

impl<E, F> AdapterFactory<E> for F
where
  E: Send + Sync + 'static,
  F: Fn() -> Result<Arc<dyn PersistenceAdapter<E>>, StrategyError> + Send + Sync,
{
  fn create(&self) -> Result<Arc<dyn PersistenceAdapter<E>>, StrategyError> {
    self()
  }
}

/// A command run around a pipeline run: before extraction starts (preparation)
/// or after a run stopped without error (finalization).
#[async_trait]
pub trait TargetCommand: Send + Sync {
  fn name(&self) -> &str;

  async fn execute(&self) -> anyhow::Result<()>;
}
