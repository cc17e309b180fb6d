// demos/ledger_import/src/store.rs

//! An in-memory ledger standing in for the target database.

use crate::ledger::LedgerEntry;
use async_trait::async_trait;
use parking_lot::Mutex;
use sluice::{PersistOutcome, PersistenceAdapter, StrategyError, TargetCommand};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{event, Level};

#[derive(Default)]
struct Books {
  entries: HashMap<u64, LedgerEntry>,
  balances: HashMap<String, i64>,
}

#[derive(Clone, Default)]
pub struct LedgerStore {
  books: Arc<Mutex<Books>>,
  overdraft_limit_cents: i64,
}

impl LedgerStore {
  pub fn new(overdraft_limit_cents: i64) -> Self {
    Self {
      books: Arc::new(Mutex::new(Books::default())),
      overdraft_limit_cents,
    }
  }

  pub fn balances(&self) -> Vec<(String, i64)> {
    let mut balances: Vec<(String, i64)> = self
      .books
      .lock()
      .balances
      .iter()
      .map(|(account, cents)| (account.clone(), *cents))
      .collect();
    balances.sort();
    balances
  }

  fn clear(&self) {
    let mut books = self.books.lock();
    books.entries.clear();
    books.balances.clear();
  }
}

#[async_trait]
impl PersistenceAdapter<LedgerEntry> for LedgerStore {
  async fn open(&self) -> Result<(), StrategyError> {
    event!(Level::INFO, entries = self.books.lock().entries.len(), "Ledger store opened.");
    Ok(())
  }

  async fn persist(&self, entry: &LedgerEntry) -> Result<PersistOutcome, StrategyError> {
    let mut books = self.books.lock();
    let previous = books.entries.get(&entry.id).cloned();
    if previous.as_ref() == Some(entry) {
      return Ok(PersistOutcome::Unchanged);
    }

    // A re-posted entry replaces its previous amount, possibly on another account.
    let mut delta: HashMap<&str, i64> = HashMap::new();
    *delta.entry(entry.account.as_str()).or_default() += entry.amount_cents;
    if let Some(previous) = &previous {
      *delta.entry(previous.account.as_str()).or_default() -= previous.amount_cents;
    }
    for (account, change) in &delta {
      let balance = books.balances.get(*account).copied().unwrap_or_default() + change;
      if balance < -self.overdraft_limit_cents {
        event!(Level::DEBUG, entry = entry.id, account = %account, balance, "Entry would overdraw the account.");
        return Ok(PersistOutcome::Rollback);
      }
    }
    let delta: Vec<(String, i64)> = delta.into_iter().map(|(a, c)| (a.to_string(), c)).collect();
    for (account, change) in delta {
      *books.balances.entry(account).or_default() += change;
    }
    books.entries.insert(entry.id, entry.clone());

    Ok(if previous.is_some() {
      PersistOutcome::Modified
    } else {
      PersistOutcome::Added
    })
  }
}

/// Empties the ledger before an import.
pub struct ResetBooks {
  pub store: LedgerStore,
}

#[async_trait]
impl TargetCommand for ResetBooks {
  fn name(&self) -> &str {
    "reset-books"
  }

  async fn execute(&self) -> anyhow::Result<()> {
    self.store.clear();
    Ok(())
  }
}

/// Logs the closing balance of every account after a successful import.
pub struct PublishBalances {
  pub store: LedgerStore,
}

#[async_trait]
impl TargetCommand for PublishBalances {
  fn name(&self) -> &str {
    "publish-balances"
  }

  async fn execute(&self) -> anyhow::Result<()> {
    for (account, cents) in self.store.balances() {
      event!(Level::INFO, account = %account, balance_cents = cents, "Closing balance.");
    }
    Ok(())
  }
}
