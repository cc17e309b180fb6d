// demos/ledger_import/src/main.rs

// Imports one or more ledger files into an in-memory ledger through a sluice pipeline.

mod config;
mod errors;
mod ledger;
mod store;

use crate::config::DemoConfig;
use crate::errors::Result as DemoResult;
use crate::ledger::{parse_line, LedgerEntry, LedgerFile, LedgerLine};
use crate::store::{LedgerStore, PublishBalances, ResetBooks};

use sluice::{ConversionFailure, Converter, ExtractionProxy, PersistenceFailure, Pipeline, SourceProxy};
use std::sync::Arc;
use tracing::Level;

#[tokio::main]
async fn main() -> DemoResult<()> {
  // Initialize tracing subscriber for logging
  tracing_subscriber::fmt()
    .with_max_level(Level::INFO) // Default level
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()) // Allow RUST_LOG override
    .init();

  tracing::info!("Starting ledger import...");

  let config = match DemoConfig::from_env() {
    Ok(cfg) => cfg,
    Err(e) => {
      tracing::error!(error = %e, "Failed to load demo configuration.");
      return Err(e);
    }
  };

  let store = LedgerStore::new(config.overdraft_limit_cents);
  let pipeline = Pipeline::<LedgerLine, LedgerEntry>::new("ledger-import", config.pipeline.clone())
    .with_preparation(ResetBooks { store: store.clone() })
    .with_finalization(PublishBalances { store: store.clone() });

  pipeline.on_conversion_failed(|failure: &ConversionFailure<LedgerLine>| {
    tracing::warn!(kind = %failure.error.kind(), error = %failure.error, "Skipped ledger line.");
  });
  pipeline.on_persistence_failed(|failure: &PersistenceFailure<LedgerEntry>| {
    tracing::warn!(entry = failure.entity.id, account = %failure.entity.account, "Entry rolled back.");
  });
  pipeline.on_state_changed(|change| {
    tracing::info!(from = ?change.from, to = ?change.to, "Import state changed.");
  });

  let proxies: Vec<Arc<dyn SourceProxy<LedgerLine>>> = config
    .ledger_files
    .iter()
    .map(|path| {
      let source = LedgerFile { path: path.clone() };
      Arc::new(ExtractionProxy::new(path.display().to_string(), source)) as Arc<dyn SourceProxy<LedgerLine>>
    })
    .collect();
  let converter: Arc<dyn Converter<LedgerLine, LedgerEntry>> = Arc::new(parse_line);
  pipeline.register_components(converter, Arc::new(store.clone()), proxies)?;

  let summary = pipeline.run().await?;
  tracing::info!(
    added = summary.counters.added,
    modified = summary.counters.modified,
    unchanged = summary.counters.unchanged,
    rolled_back = summary.counters.rolled_back,
    skipped_lines = summary.conversion_failures,
    "Ledger import finished."
  );
  Ok(())
}
