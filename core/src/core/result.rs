// sluice/src/core/result.rs

//! The result envelope produced by every stage for every directive it processed.

use crate::error::StrategyError;

/// Outcome tag of a [`StageResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  Success,
  Error,
}

/// Pairs the directive that was processed with what came out of it.
///
/// The outcome is derived from the error field: a result is `Outcome::Error`
/// exactly when it carries a captured error. A failed result may still carry a
/// value (a persistence failure is classified as a rollback, for instance).
#[derive(Debug)]
pub struct StageResult<D, V> {
  directive: D,
  value: Option<V>,
  error: Option<StrategyError>,
}

impl<D, V> StageResult<D, V> {
  pub fn success(directive: D, value: V) -> Self {
    Self {
      directive,
      value: Some(value),
      error: None,
    }
  }

  pub fn failure(directive: D, error: StrategyError) -> Self {
    Self {
      directive,
      value: None,
      error: Some(error),
    }
  }

  /// A failed result that still reports a classification.
  pub fn failure_with_value(directive: D, value: V, error: StrategyError) -> Self {
    Self {
      directive,
      value: Some(value),
      error: Some(error),
    }
  }

  pub fn outcome(&self) -> Outcome {
    if self.error.is_some() {
      Outcome::Error
    } else {
      Outcome::Success
    }
  }

  pub fn is_success(&self) -> bool {
    self.outcome() == Outcome::Success
  }

  pub fn directive(&self) -> &D {
    &self.directive
  }

  pub fn value(&self) -> Option<&V> {
    self.value.as_ref()
  }

  pub fn error(&self) -> Option<&StrategyError> {
    self.error.as_ref()
  }

  pub fn into_parts(self) -> (D, Option<V>, Option<StrategyError>) {
    (self.directive, self.value, self.error)
  }
}
