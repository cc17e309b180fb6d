// sluice/src/stage/persistence.rs

//! The persistence stage: hands entities to the persistence adapter and tallies outcomes.

use crate::core::result::StageResult;
use crate::core::strategy::{PersistOutcome, PersistenceAdapter};
use crate::error::StrategyError;
use crate::stage::engine::{Processor, Stage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{event, Level};

/// An entity paired with the adapter that must store it.
pub struct PersistenceDirective<E: Send + Sync + 'static> {
  entity: E,
  adapter: Arc<dyn PersistenceAdapter<E>>,
}

impl<E: Send + Sync + 'static> PersistenceDirective<E> {
  pub fn new(entity: E, adapter: Arc<dyn PersistenceAdapter<E>>) -> Self {
    Self { entity, adapter }
  }

  pub fn entity(&self) -> &E {
    &self.entity
  }

  pub fn into_entity(self) -> E {
    self.entity
  }
}

impl<E: std::fmt::Debug + Send + Sync + 'static> std::fmt::Debug for PersistenceDirective<E> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PersistenceDirective").field("entity", &self.entity).finish()
  }
}

pub type PersistenceResult<E> = StageResult<PersistenceDirective<E>, PersistOutcome>;

/// Point-in-time copy of the persistence counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
  pub added: u64,
  pub modified: u64,
  pub unchanged: u64,
  pub removed: u64,
  pub rolled_back: u64,
}

impl CounterSnapshot {
  pub fn total(&self) -> u64 {
    self.added + self.modified + self.unchanged + self.removed + self.rolled_back
  }
}

/// Per-run outcome tallies. Readable at any time from any thread.
#[derive(Debug, Default)]
pub struct PersistenceCounters {
  added: AtomicU64,
  modified: AtomicU64,
  unchanged: AtomicU64,
  removed: AtomicU64,
  rolled_back: AtomicU64,
}

impl PersistenceCounters {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&self, outcome: PersistOutcome) {
    let counter = match outcome {
      PersistOutcome::Added => &self.added,
      PersistOutcome::Modified => &self.modified,
      PersistOutcome::Unchanged => &self.unchanged,
      PersistOutcome::Removed => &self.removed,
      PersistOutcome::Rollback => &self.rolled_back,
    };
    counter.fetch_add(1, Ordering::Relaxed);
  }

  pub fn snapshot(&self) -> CounterSnapshot {
    CounterSnapshot {
      added: self.added.load(Ordering::Relaxed),
      modified: self.modified.load(Ordering::Relaxed),
      unchanged: self.unchanged.load(Ordering::Relaxed),
      removed: self.removed.load(Ordering::Relaxed),
      rolled_back: self.rolled_back.load(Ordering::Relaxed),
    }
  }

  pub fn reset(&self) {
    for counter in [&self.added, &self.modified, &self.unchanged, &self.removed, &self.rolled_back] {
      counter.store(0, Ordering::Relaxed);
    }
  }
}

/// [`Processor`] invoking the directive's persistence adapter.
///
/// Every result it produces is terminal and increments exactly one counter.
/// A recoverable adapter error is recorded as a failed result classified as
/// `PersistOutcome::Rollback`.
pub struct Persisting<E> {
  counters: Arc<PersistenceCounters>,
  _marker: std::marker::PhantomData<fn(E)>,
}

impl<E> Persisting<E> {
  pub fn new(counters: Arc<PersistenceCounters>) -> Self {
    Self {
      counters,
      _marker: std::marker::PhantomData,
    }
  }

  pub fn counters(&self) -> &Arc<PersistenceCounters> {
    &self.counters
  }
}

#[async_trait]
impl<E> Processor for Persisting<E>
where
  E: Send + Sync + 'static,
{
  type Directive = PersistenceDirective<E>;
  type Output = PersistOutcome;

  async fn process(&self, directive: PersistenceDirective<E>) -> Result<PersistenceResult<E>, StrategyError> {
    let persisted = directive.adapter.persist(&directive.entity).await;
    match persisted {
      Ok(outcome) => {
        self.counters.record(outcome);
        event!(Level::TRACE, %outcome, "Entity persisted.");
        Ok(StageResult::success(directive, outcome))
      }
      Err(err) if err.is_recoverable() => {
        self.counters.record(PersistOutcome::Rollback);
        event!(Level::DEBUG, error = %err, "Entity rolled back.");
        Ok(StageResult::failure_with_value(directive, PersistOutcome::Rollback, err))
      }
      Err(err) => {
        event!(Level::ERROR, error = %err, "Persistence adapter raised a fatal error.");
        Err(err)
      }
    }
  }
}

pub type PersistenceStage<E> = Stage<Persisting<E>>;

pub fn persistence_stage<E>(
  name: impl Into<String>,
  counters: Arc<PersistenceCounters>,
  max_queue_length: usize,
) -> PersistenceStage<E>
where
  E: Send + Sync + 'static,
{
  Stage::new(name, Persisting::new(counters), max_queue_length)
}
