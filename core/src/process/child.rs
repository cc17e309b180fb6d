// sluice/src/process/child.rs

//! The contract every child of a process controller fulfils.

use crate::core::notify::Observers;
use crate::error::SluiceError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_CHILD_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a stage or source proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChildId(u64);

impl ChildId {
  pub fn next() -> Self {
    ChildId(NEXT_CHILD_ID.fetch_add(1, Ordering::Relaxed))
  }
}

impl fmt::Display for ChildId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// Start/stop notification emitted by a child.
///
/// `Stopped` carries the error that ended the child, if it ended because of a
/// fatal failure.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
  Started,
  Stopped(Option<Arc<SluiceError>>),
}

impl LifecycleEvent {
  pub fn error(&self) -> Option<&Arc<SluiceError>> {
    match self {
      LifecycleEvent::Started => None,
      LifecycleEvent::Stopped(error) => error.as_ref(),
    }
  }
}

/// Registry of lifecycle observers owned by each child.
pub type Lifecycle = Observers<LifecycleEvent>;

/// A unit of work a [`ProcessController`](crate::process::ProcessController) can own:
/// a stage or a source proxy.
///
/// `start` must mark the child busy before returning, and must emit
/// `LifecycleEvent::Started` on its lifecycle whenever it (re)starts work.
/// `LifecycleEvent::Stopped` must be emitted after `is_busy` turned false.
pub trait ChildStage: Send + Sync {
  fn id(&self) -> ChildId;

  fn name(&self) -> &str;

  fn is_busy(&self) -> bool;

  fn start(&self);

  /// Cooperative cancel: queued work is dropped, in-flight work finishes.
  fn cancel(&self);

  /// Clears queued work and a previous cancellation so the child can take part in a new run.
  fn reset(&self);

  fn max_queue_length(&self) -> usize;

  /// Values of 0 are clamped to 1.
  fn set_max_queue_length(&self, max_queue_length: usize);

  fn lifecycle(&self) -> &Lifecycle;
}
