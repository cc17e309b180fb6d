// demos/ledger_import/src/config.rs

use crate::errors::{DemoError, Result};
use dotenvy::dotenv;
use sluice::PipelineConfig;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DemoConfig {
  pub ledger_files: Vec<PathBuf>,
  /// How far below zero an account balance may go before an entry is rolled back.
  pub overdraft_limit_cents: i64,
  pub pipeline: PipelineConfig,
}

impl DemoConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok(); // Load .env file if present

    let ledger_files = env::var("LEDGER_FILES")
      .unwrap_or_else(|_| {
        let data = concat!(env!("CARGO_MANIFEST_DIR"), "/data");
        format!("{data}/ledger_a.csv,{data}/ledger_b.csv")
      })
      .split(',')
      .map(str::trim)
      .filter(|path| !path.is_empty())
      .map(PathBuf::from)
      .collect::<Vec<_>>();
    if ledger_files.is_empty() {
      return Err(DemoError::Config("LEDGER_FILES names no file".to_string()));
    }

    let overdraft_limit_cents = env::var("LEDGER_OVERDRAFT_LIMIT_CENTS")
      .unwrap_or_else(|_| "0".to_string())
      .parse::<i64>()
      .map_err(|e| DemoError::Config(format!("Invalid LEDGER_OVERDRAFT_LIMIT_CENTS: {}", e)))?;

    let pipeline = PipelineConfig::from_env()?;

    tracing::info!(files = ledger_files.len(), overdraft_limit_cents, "Demo configuration loaded.");
    Ok(Self {
      ledger_files,
      overdraft_limit_cents,
      pipeline,
    })
  }
}
