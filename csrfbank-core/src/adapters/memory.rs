//! In-memory store implementation
//!
//! Used by unit tests and for throwaway runs. A unit of work holds the table
//! lock for its whole lifetime and stages every change on a private copy, so
//! discarding the unit is all it takes to roll back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{Account, NewTransfer, SeedAccount, Transfer};
use crate::ports::{LedgerStore, UnitOfWork};

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    transfers: Vec<Transfer>,
}

/// Mutex-guarded in-memory account store and ledger
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_next_append: AtomicBool,
    fail_next_commit: AtomicBool,
    pending_conflicts: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with the given accounts
    pub fn with_seeds(seeds: &[SeedAccount]) -> Self {
        let store = Self::new();
        {
            let mut tables = store.lock();
            for seed in seeds {
                let account = seed.clone().into_account();
                tables.accounts.insert(account.id, account);
            }
        }
        store
    }

    /// Make the next ledger append inside a unit of work fail
    pub fn fail_next_append(&self) {
        self.fail_next_append.store(true, Ordering::SeqCst);
    }

    /// Make the next commit fail
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Make the next `count` commits report a write conflict
    pub fn conflict_next_commits(&self, count: u32) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Poisoning only means a unit panicked; its staged changes were never
    /// published, so the tables are intact.
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LedgerStore for MemoryStore {
    fn find_by_username(&self, username: &str) -> Result<Option<Account>> {
        let tables = self.lock();
        Ok(tables
            .accounts
            .values()
            .find(|a| a.username == username)
            .cloned())
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let tables = self.lock();
        let mut accounts: Vec<Account> = tables.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(accounts)
    }

    fn seed_if_empty(&self, seeds: &[SeedAccount]) -> Result<usize> {
        let mut tables = self.lock();
        if !tables.accounts.is_empty() {
            return Ok(0);
        }
        for seed in seeds {
            let account = seed.clone().into_account();
            account.validate().map_err(Error::validation)?;
            if tables.accounts.values().any(|a| a.username == account.username) {
                return Err(Error::validation(format!(
                    "duplicate username {}",
                    account.username
                )));
            }
            tables.accounts.insert(account.id, account);
        }
        Ok(seeds.len())
    }

    fn list_transfers(&self, limit: usize) -> Result<Vec<Transfer>> {
        let tables = self.lock();
        Ok(tables.transfers.iter().rev().take(limit).cloned().collect())
    }

    fn transfer_count(&self) -> Result<i64> {
        Ok(self.lock().transfers.len() as i64)
    }

    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>> {
        Ok(Box::new(MemoryUnitOfWork {
            store: self,
            tables: self.lock(),
            staged_balances: HashMap::new(),
            staged_transfers: Vec::new(),
        }))
    }
}

struct MemoryUnitOfWork<'a> {
    store: &'a MemoryStore,
    tables: MutexGuard<'a, Tables>,
    staged_balances: HashMap<Uuid, i64>,
    staged_transfers: Vec<Transfer>,
}

impl UnitOfWork for MemoryUnitOfWork<'_> {
    fn balance(&mut self, account_id: Uuid) -> Result<Option<i64>> {
        if let Some(balance) = self.staged_balances.get(&account_id) {
            return Ok(Some(*balance));
        }
        Ok(self.tables.accounts.get(&account_id).map(|a| a.balance))
    }

    fn set_balance(&mut self, account_id: Uuid, new_balance: i64) -> Result<()> {
        if !self.tables.accounts.contains_key(&account_id) {
            return Err(Error::not_found(format!("account {}", account_id)));
        }
        self.staged_balances.insert(account_id, new_balance);
        Ok(())
    }

    fn append_transfer(&mut self, entry: &NewTransfer) -> Result<Transfer> {
        if self.store.fail_next_append.swap(false, Ordering::SeqCst) {
            return Err(Error::database("injected ledger append failure"));
        }
        if entry.amount <= 0 {
            return Err(Error::validation("transfer amount must be positive"));
        }
        let transfer = entry.clone().into_transfer();
        self.staged_transfers.push(transfer.clone());
        Ok(transfer)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        if self.store.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(Error::database("injected commit failure"));
        }
        let conflicted = self
            .store
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflicted {
            return Err(Error::Conflict("injected write conflict".to_string()));
        }
        let now = chrono::Utc::now();
        let staged_balances = std::mem::take(&mut self.staged_balances);
        let staged_transfers = std::mem::take(&mut self.staged_transfers);
        for (account_id, balance) in staged_balances {
            if let Some(account) = self.tables.accounts.get_mut(&account_id) {
                account.balance = balance;
                account.updated_at = now;
            }
        }
        self.tables.transfers.extend(staged_transfers);
        Ok(())
    }
}
