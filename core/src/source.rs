// sluice/src/source.rs

//! The extraction side of a pipeline.
//!
//! A [`SourceProxy`] is the controller-facing wrapper around a data source: it is a
//! [`ChildStage`] with a buffered cursor over extracted items and an "items produced"
//! signal. [`ExtractionProxy`] is the stock implementation; it drives any [`Source`]
//! on its own task and throttles it through a bounded buffer.

use crate::config::DEFAULT_MAX_QUEUE_LENGTH;
use crate::core::notify::Signal;
use crate::error::{SluiceError, StrategyError};
use crate::process::child::{ChildId, ChildStage, Lifecycle, LifecycleEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{event, Level};

/// Controller-facing contract of a source of items of type `T`.
pub trait SourceProxy<T>: ChildStage {
  /// Takes the oldest buffered item. Never blocks.
  fn next_item(&self) -> Option<T>;

  /// Fired whenever new items are buffered. Handlers must drain
  /// [`next_item`](Self::next_item) until it returns `None`.
  fn items_produced(&self) -> &Signal;

  fn into_child(self: Arc<Self>) -> Arc<dyn ChildStage>;
}

/// Something items can be extracted from: a file, a query, an in-memory list.
#[async_trait]
pub trait Source: Send + Sync + 'static {
  type Item: Send + 'static;

  /// Pushes every item into `sink`. Must return early once `sink.push` reports
  /// that the proxy was cancelled. An `Err` stops the proxy with that error.
  async fn extract(&self, sink: &ItemSink<Self::Item>) -> Result<(), StrategyError>;
}

struct ProxyState<T> {
  items: VecDeque<T>,
  max_len: usize,
  running: bool,
  cancelled: bool,
}

struct ProxyInner<T: Send + 'static> {
  id: ChildId,
  name: String,
  source: Mutex<Option<Arc<dyn Source<Item = T>>>>,
  state: Mutex<ProxyState<T>>,
  space_freed: Notify,
  items_produced: Signal,
  lifecycle: Lifecycle,
}

/// Handle a [`Source`] pushes its items into.
pub struct ItemSink<T: Send + 'static> {
  inner: Arc<ProxyInner<T>>,
}

impl<T: Send + 'static> ItemSink<T> {
  /// Buffers one item and fires the proxy's "items produced" signal.
  ///
  /// Waits while the buffer holds `max_queue_length` items. Returns `false` if the
  /// proxy has been cancelled, in which case the item is dropped.
  pub async fn push(&self, item: T) -> bool {
    loop {
      let space_freed = self.inner.space_freed.notified();
      {
        let mut state = self.inner.state.lock();
        if state.cancelled {
          return false;
        }
        if state.items.len() < state.max_len {
          state.items.push_back(item);
          break;
        }
      }
      space_freed.await;
    }
    self.inner.items_produced.fire().await;
    true
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.state.lock().cancelled
  }
}

/// Stock [`SourceProxy`] driving a [`Source`] on a spawned task.
pub struct ExtractionProxy<T: Send + 'static> {
  inner: Arc<ProxyInner<T>>,
}

impl<T: Send + 'static> ExtractionProxy<T> {
  pub fn new(name: impl Into<String>, source: impl Source<Item = T>) -> Self {
    let proxy = Self::unbound(name);
    *proxy.inner.source.lock() = Some(Arc::new(source));
    proxy
  }

  /// A proxy without a source; give it one with [`begin_extraction`](Self::begin_extraction).
  pub fn unbound(name: impl Into<String>) -> Self {
    Self {
      inner: Arc::new(ProxyInner {
        id: ChildId::next(),
        name: name.into(),
        source: Mutex::new(None),
        state: Mutex::new(ProxyState {
          items: VecDeque::new(),
          max_len: DEFAULT_MAX_QUEUE_LENGTH,
          running: false,
          cancelled: false,
        }),
        space_freed: Notify::new(),
        items_produced: Signal::new(),
        lifecycle: Lifecycle::new(),
      }),
    }
  }

  /// Replaces the proxy's source and starts extracting from it.
  ///
  /// Ignored (with a warning) while a previous extraction is still running.
  pub fn begin_extraction(&self, source: Arc<dyn Source<Item = T>>) {
    {
      let mut state = self.inner.state.lock();
      if state.running {
        event!(Level::WARN, proxy = %self.inner.name, "Extraction already running; begin_extraction ignored.");
        return;
      }
      state.running = true;
      state.cancelled = false;
    }
    *self.inner.source.lock() = Some(Arc::clone(&source));
    self.launch(source);
  }

  fn launch(&self, source: Arc<dyn Source<Item = T>>) {
    event!(Level::DEBUG, proxy = %self.inner.name, "Extraction started.");
    self.inner.lifecycle.emit(&LifecycleEvent::Started);
    let inner = Arc::clone(&self.inner);
    tokio::spawn(async move {
      let sink = ItemSink {
        inner: Arc::clone(&inner),
      };
      let extracted = source.extract(&sink).await;
      inner.state.lock().running = false;
      let failure = match extracted {
        Ok(()) => {
          event!(Level::DEBUG, proxy = %inner.name, "Extraction finished.");
          None
        }
        Err(err) => {
          event!(Level::ERROR, proxy = %inner.name, error = %err, "Extraction failed.");
          Some(Arc::new(SluiceError::StageFailed {
            stage: inner.name.clone(),
            source: err,
          }))
        }
      };
      inner.lifecycle.emit(&LifecycleEvent::Stopped(failure));
    });
  }
}

impl<T: Send + 'static> SourceProxy<T> for ExtractionProxy<T> {
  fn next_item(&self) -> Option<T> {
    let item = self.inner.state.lock().items.pop_front();
    if item.is_some() {
      self.inner.space_freed.notify_waiters();
    }
    item
  }

  fn items_produced(&self) -> &Signal {
    &self.inner.items_produced
  }

  fn into_child(self: Arc<Self>) -> Arc<dyn ChildStage> {
    self
  }
}

impl<T: Send + 'static> ChildStage for ExtractionProxy<T> {
  fn id(&self) -> ChildId {
    self.inner.id
  }

  fn name(&self) -> &str {
    &self.inner.name
  }

  fn is_busy(&self) -> bool {
    let state = self.inner.state.lock();
    state.running || !state.items.is_empty()
  }

  fn start(&self) {
    let source = self.inner.source.lock().clone();
    match source {
      Some(source) => self.begin_extraction(source),
      None => {
        event!(Level::WARN, proxy = %self.inner.name, "No source bound; nothing to extract.");
      }
    }
  }

  fn cancel(&self) {
    let dropped = {
      let mut state = self.inner.state.lock();
      state.cancelled = true;
      let dropped = state.items.len();
      state.items.clear();
      dropped
    };
    self.inner.space_freed.notify_waiters();
    event!(Level::DEBUG, proxy = %self.inner.name, dropped, "Proxy cancelled.");
  }

  fn reset(&self) {
    {
      let mut state = self.inner.state.lock();
      state.cancelled = false;
      state.items.clear();
    }
    self.inner.space_freed.notify_waiters();
  }

  fn max_queue_length(&self) -> usize {
    self.inner.state.lock().max_len
  }

  fn set_max_queue_length(&self, max_queue_length: usize) {
    self.inner.state.lock().max_len = max_queue_length.max(1);
    self.inner.space_freed.notify_waiters();
  }

  fn lifecycle(&self) -> &Lifecycle {
    &self.inner.lifecycle
  }
}

/// In-memory [`Source`] replaying a fixed list of items on every extraction.
pub struct IterSource<T> {
  items: Vec<T>,
}

impl<T> IterSource<T> {
  pub fn new(items: impl IntoIterator<Item = T>) -> Self {
    Self {
      items: items.into_iter().collect(),
    }
  }
}

#[async_trait]
impl<T> Source for IterSource<T>
where
  T: Clone + Send + Sync + 'static,
{
  type Item = T;

  async fn extract(&self, sink: &ItemSink<T>) -> Result<(), StrategyError> {
    for item in &self.items {
      if !sink.push(item.clone()).await {
        break;
      }
    }
    Ok(())
  }
}
