// demos/ledger_import/src/ledger.rs

//! Ledger files and their entries.

use async_trait::async_trait;
use sluice::{FailureKind, ItemSink, Source, StrategyError};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
  pub id: u64,
  pub account: String,
  pub amount_cents: i64,
  pub memo: String,
}

/// One raw line of a ledger file, tagged with where it came from.
#[derive(Debug, Clone)]
pub struct LedgerLine {
  pub file: String,
  pub number: usize,
  pub text: String,
}

/// Parses `id,account,amount_cents,memo`. Every parse problem is a recoverable
/// validation failure; a zero amount breaks a business rule.
pub fn parse_line(line: &LedgerLine) -> Result<Option<LedgerEntry>, StrategyError> {
  let fields: Vec<&str> = line.text.splitn(4, ',').map(str::trim).collect();
  let [id, account, amount, memo] = fields.as_slice() else {
    return Err(StrategyError::validation(format!(
      "{}:{}: expected 4 fields, found {}",
      line.file,
      line.number,
      fields.len()
    )));
  };

  let id = id
    .parse::<u64>()
    .map_err(|e| StrategyError::validation(format!("{}:{}: bad id '{}': {}", line.file, line.number, id, e)))?;
  let amount_cents = amount.parse::<i64>().map_err(|e| {
    StrategyError::validation(format!("{}:{}: bad amount '{}': {}", line.file, line.number, amount, e))
  })?;
  if account.is_empty() {
    return Err(StrategyError::validation(format!("{}:{}: empty account", line.file, line.number)));
  }
  if amount_cents == 0 {
    return Err(StrategyError::business_rule(format!(
      "{}:{}: zero-amount entry {}",
      line.file, line.number, id
    )));
  }

  Ok(Some(LedgerEntry {
    id,
    account: account.to_string(),
    amount_cents,
    memo: memo.to_string(),
  }))
}

/// Streams the lines of a ledger file, skipping blanks and `#` comments.
pub struct LedgerFile {
  pub path: PathBuf,
}

#[async_trait]
impl Source for LedgerFile {
  type Item = LedgerLine;

  async fn extract(&self, sink: &ItemSink<LedgerLine>) -> Result<(), StrategyError> {
    let contents = tokio::fs::read_to_string(&self.path)
      .await
      .map_err(|e| StrategyError::new(FailureKind::Fatal, e))?;
    let file = self.path.display().to_string();

    for (idx, text) in contents.lines().enumerate() {
      let text = text.trim();
      if text.is_empty() || text.starts_with('#') {
        continue;
      }
      let line = LedgerLine {
        file: file.clone(),
        number: idx + 1,
        text: text.to_string(),
      };
      if !sink.push(line).await {
        tracing::debug!(file = %file, "Extraction cancelled.");
        break;
      }
    }
    Ok(())
  }
}
