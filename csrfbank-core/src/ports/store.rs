//! Store port - account store and transfer ledger abstraction

use uuid::Uuid;

use crate::domain::result::Result;
use crate::domain::{Account, NewTransfer, SeedAccount, Transfer};

/// Shared account store and transfer ledger
///
/// Reads outside a unit of work see committed state only. All mutations go
/// through [`LedgerStore::begin`].
pub trait LedgerStore: Send + Sync {
    // === Accounts ===

    /// Look up an account by its username
    fn find_by_username(&self, username: &str) -> Result<Option<Account>>;

    /// All accounts, ordered by username
    fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Insert the seed accounts if the store holds no accounts yet.
    /// Returns how many accounts were created.
    fn seed_if_empty(&self, seeds: &[SeedAccount]) -> Result<usize>;

    // === Ledger ===

    /// Most recent ledger entries, newest first
    fn list_transfers(&self, limit: usize) -> Result<Vec<Transfer>>;

    /// Total number of ledger entries
    fn transfer_count(&self) -> Result<i64>;

    // === Atomic units ===

    /// Open an atomic unit of work
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>>;
}

/// A scoped atomic unit over the store
///
/// Changes become visible to others only after [`UnitOfWork::commit`]
/// succeeds. Dropping a unit without committing rolls it back, whether the
/// caller returned early, propagated an error or panicked.
pub trait UnitOfWork {
    /// Balance of an account as seen inside this unit
    fn balance(&mut self, account_id: Uuid) -> Result<Option<i64>>;

    /// Overwrite the balance of one account
    fn set_balance(&mut self, account_id: Uuid, new_balance: i64) -> Result<()>;

    /// Append a ledger entry
    fn append_transfer(&mut self, entry: &NewTransfer) -> Result<Transfer>;

    /// Make every change in this unit durable and visible
    fn commit(self: Box<Self>) -> Result<()>;
}
