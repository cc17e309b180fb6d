// sluice/src/error.rs
use crate::process::state::ProcessState;
use anyhow::Error as AnyhowError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SluiceError {
  #[error("Stage '{stage}' is cancelled; directive rejected")]
  StageCancelled { stage: String },

  #[error("Fatal failure in stage '{stage}'. Source: {source}")]
  StageFailed {
    stage: String,
    #[source]
    source: StrategyError,
  },

  #[error("Worker of stage '{stage}' panicked: {message}")]
  StagePanicked { stage: String, message: String },

  #[error("No components registered with pipeline '{pipeline}'")]
  NotRegistered { pipeline: String },

  #[error("Pipeline '{pipeline}' is active (state: {state:?}); {operation} is not allowed")]
  PipelineActive {
    pipeline: String,
    state: ProcessState,
    operation: &'static str,
  },

  #[error("Invalid state transition from {from:?} to {to:?}")]
  InvalidTransition { from: ProcessState, to: ProcessState },

  #[error("Target command '{command}' failed. Source: {source}")]
  TargetCommandFailed {
    command: String,
    #[source]
    source: AnyhowError,
  },

  #[error("Persistence adapter failed to {operation}. Source: {source}")]
  AdapterLifecycle {
    operation: &'static str,
    #[source]
    source: StrategyError,
  },

  #[error("Pipeline run failed: {0}")]
  RunFailed(#[source] Arc<SluiceError>),

  #[error("Configuration error: {message}")]
  ConfigurationError { message: String },

  #[error("Internal sluice error: {0}")]
  Internal(String),
}

pub type SluiceResult<T, E = SluiceError> = std::result::Result<T, E>;

/// Classifies a strategy failure. Every kind except `Fatal` is recoverable:
/// the failing item is reported and the pipeline moves on to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
  /// Argument or payload validation failed.
  Validation,
  /// The strategy was asked to act on an object in the wrong state.
  InvalidState,
  /// A declared business rule rejected the item (including "conversion produced nothing").
  BusinessRule,
  /// A declared operation failure the strategy knows how to survive.
  Operation,
  /// Permission or access failure for this item.
  Access,
  /// Anything else. Stops the stage and fails the whole run.
  Fatal,
}

impl FailureKind {
  pub fn is_recoverable(self) -> bool {
    !matches!(self, FailureKind::Fatal)
  }
}

impl fmt::Display for FailureKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      FailureKind::Validation => "validation",
      FailureKind::InvalidState => "invalid state",
      FailureKind::BusinessRule => "business rule",
      FailureKind::Operation => "operation",
      FailureKind::Access => "access",
      FailureKind::Fatal => "fatal",
    };
    f.write_str(label)
  }
}

/// Error returned by user-supplied strategies (converters, persistence adapters, sources).
///
/// The `kind` is the only thing stages look at when deciding whether a failure is
/// captured into the item's result or ends the stage.
#[derive(Debug, Error)]
#[error("{kind} failure: {source}")]
pub struct StrategyError {
  kind: FailureKind,
  #[source]
  source: AnyhowError,
}

impl StrategyError {
  pub fn new(kind: FailureKind, source: impl Into<AnyhowError>) -> Self {
    Self {
      kind,
      source: source.into(),
    }
  }

  pub fn validation(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
    Self::new(FailureKind::Validation, AnyhowError::msg(message))
  }

  pub fn invalid_state(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
    Self::new(FailureKind::InvalidState, AnyhowError::msg(message))
  }

  pub fn business_rule(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
    Self::new(FailureKind::BusinessRule, AnyhowError::msg(message))
  }

  pub fn operation(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
    Self::new(FailureKind::Operation, AnyhowError::msg(message))
  }

  pub fn access(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
    Self::new(FailureKind::Access, AnyhowError::msg(message))
  }

  pub fn fatal(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
    Self::new(FailureKind::Fatal, AnyhowError::msg(message))
  }

  pub fn kind(&self) -> FailureKind {
    self.kind
  }

  pub fn is_recoverable(&self) -> bool {
    self.kind.is_recoverable()
  }

  pub fn source_error(&self) -> &AnyhowError {
    &self.source
  }
}

// Errors that arrive without a classification are not known to be survivable.
impl From<AnyhowError> for StrategyError {
  fn from(err: AnyhowError) -> Self {
    // Keep the original classification if the anyhow::Error is already wrapping one.
    match err.downcast::<StrategyError>() {
      Ok(strategy_err) => strategy_err,
      Err(err) => StrategyError::new(FailureKind::Fatal, err),
    }
  }
}
