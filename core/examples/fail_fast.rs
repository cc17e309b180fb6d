// sluice/examples/fail_fast.rs

use async_trait::async_trait;
use sluice::{
  ExtractionProxy, ItemSink, PersistOutcome, PersistenceAdapter, Pipeline, PipelineConfig, ProcessState, SluiceError,
  Source, SourceProxy, StrategyError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

// A source that would never end on its own.
struct Ticker;

#[async_trait]
impl Source for Ticker {
  type Item = u32;

  async fn extract(&self, sink: &ItemSink<u32>) -> Result<(), StrategyError> {
    let mut tick = 0;
    while sink.push(tick).await {
      tick += 1;
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    info!("Ticker stopped after {} ticks", tick);
    Ok(())
  }
}

// An adapter whose connection drops after a few writes.
struct FlakyStore {
  writes: AtomicU32,
}

#[async_trait]
impl PersistenceAdapter<u32> for FlakyStore {
  async fn persist(&self, _entity: &u32) -> Result<PersistOutcome, StrategyError> {
    if self.writes.fetch_add(1, Ordering::SeqCst) >= 10 {
      // Unclassified errors are fatal.
      return Err(anyhow::anyhow!("connection reset by peer").into());
    }
    Ok(PersistOutcome::Added)
  }
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Fail-Fast Example ---");

  let pipeline = Pipeline::<u32, u32>::new("ticks", PipelineConfig::default());
  pipeline.on_state_changed(|change| {
    info!("State {:?} -> {:?} (error: {:?})", change.from, change.to, change.error.as_ref().map(|e| e.to_string()));
  });

  let converter = Arc::new(|tick: &u32| -> Result<Option<u32>, StrategyError> { Ok(Some(*tick)) });
  let proxies: Vec<Arc<dyn SourceProxy<u32>>> = vec![
    Arc::new(ExtractionProxy::new("ticker-a", Ticker)),
    Arc::new(ExtractionProxy::new("ticker-b", Ticker)),
  ];
  let store = Arc::new(FlakyStore {
    writes: AtomicU32::new(0),
  });
  if let Err(e) = pipeline.register_components(converter, store, proxies) {
    error!("Registration failed: {}", e);
    return;
  }

  match pipeline.run().await {
    Ok(summary) => error!("Run unexpectedly succeeded: {:?}", summary),
    Err(SluiceError::RunFailed(cause)) => {
      info!("Run failed as expected: {}", cause);
      assert!(matches!(cause.as_ref(), SluiceError::StageFailed { .. }));
    }
    Err(other) => error!("Unexpected error: {}", other),
  }
  assert_eq!(pipeline.state(), ProcessState::Stopped);
  info!("Counters after the failure: {:?}", pipeline.counters());

  info!("--- Fail-Fast Example Finished ---");
}
