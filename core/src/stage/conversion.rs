// sluice/src/stage/conversion.rs

//! The conversion stage: turns extracted items into entities with the caller's converter.

use crate::core::result::StageResult;
use crate::core::strategy::Converter;
use crate::error::StrategyError;
use crate::stage::engine::{Processor, Stage};
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{event, Level};

/// An item paired with the converter that must process it.
pub struct ConversionDirective<I, E> {
  item: I,
  converter: Arc<dyn Converter<I, E>>,
}

impl<I, E> ConversionDirective<I, E> {
  pub fn new(item: I, converter: Arc<dyn Converter<I, E>>) -> Self {
    Self { item, converter }
  }

  pub fn item(&self) -> &I {
    &self.item
  }

  pub fn into_item(self) -> I {
    self.item
  }
}

impl<I: std::fmt::Debug, E> std::fmt::Debug for ConversionDirective<I, E> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConversionDirective").field("item", &self.item).finish()
  }
}

pub type ConversionResult<I, E> = StageResult<ConversionDirective<I, E>, E>;

/// [`Processor`] invoking the directive's converter.
pub struct Converting<I, E> {
  _marker: PhantomData<fn(I) -> E>,
}

impl<I, E> Converting<I, E> {
  pub fn new() -> Self {
    Self { _marker: PhantomData }
  }
}

impl<I, E> Default for Converting<I, E> {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl<I, E> Processor for Converting<I, E>
where
  I: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  type Directive = ConversionDirective<I, E>;
  type Output = E;

  async fn process(&self, directive: ConversionDirective<I, E>) -> Result<ConversionResult<I, E>, StrategyError> {
    match directive.converter.convert(&directive.item) {
      Ok(Some(entity)) => Ok(StageResult::success(directive, entity)),
      Ok(None) => Ok(StageResult::failure(
        directive,
        StrategyError::business_rule("conversion produced nothing"),
      )),
      Err(err) if err.is_recoverable() => {
        event!(Level::DEBUG, error = %err, "Item failed conversion.");
        Ok(StageResult::failure(directive, err))
      }
      Err(err) => {
        event!(Level::ERROR, error = %err, "Converter raised a fatal error.");
        Err(err)
      }
    }
  }
}

pub type ConversionStage<I, E> = Stage<Converting<I, E>>;

pub fn conversion_stage<I, E>(name: impl Into<String>, max_queue_length: usize) -> ConversionStage<I, E>
where
  I: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  Stage::new(name, Converting::new(), max_queue_length)
}
