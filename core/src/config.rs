// sluice/src/config.rs

//! Pipeline configuration: the global backpressure knob and the counter policy.

use crate::error::{SluiceError, SluiceResult};
use std::env;
use std::str::FromStr;

pub const DEFAULT_MAX_QUEUE_LENGTH: usize = 100;

pub const ENV_MAX_QUEUE_LENGTH: &str = "SLUICE_MAX_QUEUE_LENGTH";
pub const ENV_COUNTER_POLICY: &str = "SLUICE_COUNTER_POLICY";

/// When the persistence counters go back to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CounterPolicy {
  /// Counters reset whenever a new set of components is registered.
  #[default]
  ResetOnRegister,
  /// Counters reset at the start of every run.
  ResetOnStart,
  /// Counters are never reset by the pipeline.
  Accumulate,
}

impl FromStr for CounterPolicy {
  type Err = SluiceError;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    match value.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
      "resetonregister" | "register" => Ok(CounterPolicy::ResetOnRegister),
      "resetonstart" | "start" => Ok(CounterPolicy::ResetOnStart),
      "accumulate" => Ok(CounterPolicy::Accumulate),
      other => Err(SluiceError::ConfigurationError {
        message: format!("unknown counter policy '{}'", other),
      }),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
  /// Applied to the conversion stage, the persistence stage and every registered proxy.
  pub max_queue_length: usize,
  pub counter_policy: CounterPolicy,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      max_queue_length: DEFAULT_MAX_QUEUE_LENGTH,
      counter_policy: CounterPolicy::default(),
    }
  }
}

impl PipelineConfig {
  /// Reads `SLUICE_MAX_QUEUE_LENGTH` and `SLUICE_COUNTER_POLICY`, falling back to
  /// the defaults for variables that are not set.
  pub fn from_env() -> SluiceResult<Self> {
    let defaults = Self::default();

    let max_queue_length = match env::var(ENV_MAX_QUEUE_LENGTH) {
      Ok(raw) => raw.trim().parse::<usize>().map_err(|e| SluiceError::ConfigurationError {
        message: format!("invalid {}='{}': {}", ENV_MAX_QUEUE_LENGTH, raw, e),
      })?,
      Err(_) => defaults.max_queue_length,
    };

    let counter_policy = match env::var(ENV_COUNTER_POLICY) {
      Ok(raw) => raw.parse::<CounterPolicy>()?,
      Err(_) => defaults.counter_policy,
    };

    tracing::debug!(max_queue_length, ?counter_policy, "Pipeline configuration loaded from environment.");
    Ok(Self {
      max_queue_length: max_queue_length.max(1),
      counter_policy,
    })
  }

  pub fn with_max_queue_length(mut self, max_queue_length: usize) -> Self {
    self.max_queue_length = max_queue_length.max(1);
    self
  }

  pub fn with_counter_policy(mut self, counter_policy: CounterPolicy) -> Self {
    self.counter_policy = counter_policy;
    self
  }
}
