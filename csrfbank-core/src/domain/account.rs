//! Account domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A ledger account, identified by a unique username
///
/// The username never changes after creation. The balance is only mutated by
/// the transfer engine inside a unit of work and never goes negative once a
/// transfer commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with an opening balance
    pub fn new(username: impl Into<String>, balance: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            balance,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate account data
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.username.trim().is_empty() {
            return Err("username cannot be empty");
        }
        if self.balance < 0 {
            return Err("balance cannot be negative");
        }
        Ok(())
    }

    pub fn can_cover(&self, amount: i64) -> bool {
        self.balance >= amount
    }
}

/// An account created when the store is first initialized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedAccount {
    pub username: String,
    pub balance: i64,
}

impl SeedAccount {
    pub fn new(username: impl Into<String>, balance: i64) -> Self {
        Self {
            username: username.into(),
            balance,
        }
    }

    /// The demo seed: alice and bob with 1000 each
    pub fn defaults() -> Vec<SeedAccount> {
        vec![SeedAccount::new("alice", 1000), SeedAccount::new("bob", 1000)]
    }

    pub fn into_account(self) -> Account {
        Account::new(self.username, self.balance)
    }
}
