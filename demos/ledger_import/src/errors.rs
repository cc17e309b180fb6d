// demos/ledger_import/src/errors.rs

use sluice::SluiceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DemoError {
  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Import failed: {source}")]
  Import {
    #[from] // Allows conversion from sluice::SluiceError
    source: SluiceError,
  },
}

pub type Result<T, E = DemoError> = std::result::Result<T, E>;
