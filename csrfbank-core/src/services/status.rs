//! Status service - account balances and ledger summary

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::domain::result::Result;
use crate::ports::LedgerStore;

/// Number of ledger entries included in a status summary
pub const RECENT_TRANSFERS: usize = 10;

/// Status service for account and ledger summaries
pub struct StatusService {
    store: Arc<dyn LedgerStore>,
}

impl StatusService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Get overall status summary
    pub fn get_status(&self) -> Result<StatusSummary> {
        self.get_status_with_limit(RECENT_TRANSFERS)
    }

    pub fn get_status_with_limit(&self, recent: usize) -> Result<StatusSummary> {
        let accounts = self.store.list_accounts()?;
        let total_transfers = self.store.transfer_count()?;
        let transfers = self.store.list_transfers(recent)?;

        let names: HashMap<_, _> = accounts
            .iter()
            .map(|a| (a.id, a.username.clone()))
            .collect();
        let name_of = |id: Uuid| names.get(&id).cloned().unwrap_or_else(|| id.to_string());

        Ok(StatusSummary {
            total_accounts: accounts.len() as i64,
            total_balance: accounts.iter().map(|a| a.balance).sum(),
            total_transfers,
            recent_transfers: transfers
                .into_iter()
                .map(|t| TransferSummary {
                    id: t.id.to_string(),
                    from: name_of(t.from_account_id),
                    to: name_of(t.to_account_id),
                    amount: t.amount,
                    description: t.description,
                    created_at: t.created_at.to_rfc3339(),
                })
                .collect(),
            accounts: accounts
                .into_iter()
                .map(|a| AccountSummary {
                    id: a.id.to_string(),
                    username: a.username,
                    balance: a.balance,
                })
                .collect(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusSummary {
    pub total_accounts: i64,
    pub total_balance: i64,
    pub total_transfers: i64,
    pub accounts: Vec<AccountSummary>,
    pub recent_transfers: Vec<TransferSummary>,
}

#[derive(Debug, Serialize)]
pub struct AccountSummary {
    pub id: String,
    pub username: String,
    pub balance: i64,
}

#[derive(Debug, Serialize)]
pub struct TransferSummary {
    pub id: String,
    pub from: String,
    pub to: String,
    pub amount: i64,
    pub description: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::domain::{SeedAccount, TransferChannel};
    use crate::services::TransferEngine;

    #[test]
    fn test_status_summary() {
        let store = Arc::new(MemoryStore::with_seeds(&SeedAccount::defaults()));
        let engine = TransferEngine::new(store.clone(), "alice");
        let service = StatusService::new(store);

        engine
            .execute_transfer(None, "bob", "250", TransferChannel::Unprotected)
            .unwrap();

        let status = service.get_status().unwrap();
        assert_eq!(status.total_accounts, 2);
        assert_eq!(status.total_balance, 2000);
        assert_eq!(status.total_transfers, 1);
        assert_eq!(status.accounts[0].username, "alice");
        assert_eq!(status.accounts[0].balance, 750);
        assert_eq!(status.recent_transfers[0].from, "alice");
        assert_eq!(status.recent_transfers[0].to, "bob");
        assert_eq!(status.recent_transfers[0].amount, 250);
    }

    #[test]
    fn test_recent_transfers_limited() {
        let store = Arc::new(MemoryStore::with_seeds(&SeedAccount::defaults()));
        let engine = TransferEngine::new(store.clone(), "alice");
        for _ in 0..5 {
            engine
                .execute_transfer(None, "bob", "1", TransferChannel::Unprotected)
                .unwrap();
        }

        let status = StatusService::new(store).get_status_with_limit(3).unwrap();
        assert_eq!(status.total_transfers, 5);
        assert_eq!(status.recent_transfers.len(), 3);
    }
}
