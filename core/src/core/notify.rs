// sluice/src/core/notify.rs

//! Observer registries used in place of multicast events.
//!
//! Two flavours exist:
//! - [`Observers<T>`] holds synchronous callbacks receiving `&T`. Lifecycle events,
//!   state changes and per-item failure reports travel through these.
//! - [`Signal`] holds asynchronous "drain now" handlers. A signal carries no payload;
//!   it tells a consumer that a cursor has data, and the consumer is expected to drain
//!   that cursor until it is empty. Firing a signal awaits every handler in turn, which is
//!   what lets a downstream `submit` throttle the upstream worker.
//!
//! Callbacks are cloned out of the registry before being invoked, so a callback may
//! subscribe or unsubscribe without deadlocking.

use parking_lot::RwLock;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by every `subscribe` call, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type Observer<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

/// Type alias for a signal handler: a function producing a boxed, sendable future.
pub type SignalHandler = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static>;

/// A registry of synchronous observers for events of type `T`.
pub struct Observers<T: ?Sized> {
  next_id: AtomicU64,
  entries: RwLock<Vec<(SubscriptionId, Observer<T>)>>,
}

impl<T: ?Sized> Observers<T> {
  pub fn new() -> Self {
    Self {
      next_id: AtomicU64::new(1),
      entries: RwLock::new(Vec::new()),
    }
  }

  pub fn subscribe(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
    let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
    self.entries.write().push((id, Arc::new(observer)));
    id
  }

  /// Returns `false` if the subscription was already gone.
  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    let mut entries = self.entries.write();
    let before = entries.len();
    entries.retain(|(entry_id, _)| *entry_id != id);
    entries.len() != before
  }

  pub fn len(&self) -> usize {
    self.entries.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.read().is_empty()
  }

  pub fn emit(&self, event: &T) {
    let snapshot: Vec<Observer<T>> = self.entries.read().iter().map(|(_, obs)| Arc::clone(obs)).collect();
    for observer in snapshot {
      observer(event);
    }
  }
}

impl<T: ?Sized> Default for Observers<T> {
  fn default() -> Self {
    Self::new()
  }
}

/// A registry of asynchronous, payload-free handlers.
pub struct Signal {
  next_id: AtomicU64,
  handlers: RwLock<Vec<(SubscriptionId, SignalHandler)>>,
}

impl Signal {
  pub fn new() -> Self {
    Self {
      next_id: AtomicU64::new(1),
      handlers: RwLock::new(Vec::new()),
    }
  }

  /// Registers an async handler. The closure is called once per `fire` and the
  /// returned future is awaited before the next handler runs.
  pub fn subscribe<F, Fut>(&self, handler: F) -> SubscriptionId
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
    let boxed: SignalHandler = Arc::new(move || -> Pin<Box<dyn Future<Output = ()> + Send>> { Box::pin(handler()) });
    self.handlers.write().push((id, boxed));
    id
  }

  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    let mut handlers = self.handlers.write();
    let before = handlers.len();
    handlers.retain(|(entry_id, _)| *entry_id != id);
    handlers.len() != before
  }

  pub fn len(&self) -> usize {
    self.handlers.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.handlers.read().is_empty()
  }

  pub async fn fire(&self) {
    let snapshot: Vec<SignalHandler> = self.handlers.read().iter().map(|(_, h)| Arc::clone(h)).collect();
    for handler in snapshot {
      handler().await;
    }
  }
}

impl Default for Signal {
  fn default() -> Self {
    Self::new()
  }
}
