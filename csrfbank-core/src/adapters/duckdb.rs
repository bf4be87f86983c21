//! DuckDB store implementation

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use duckdb::types::Type;
use duckdb::{params, Connection};
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{Account, NewTransfer, SeedAccount, Transfer};
use crate::ports::{LedgerStore, UnitOfWork};
use crate::services::MigrationService;

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

const ACCOUNT_COLUMNS: &str = "account_id, username, balance, created_at, updated_at";

const TRANSFER_COLUMNS: &str =
    "transfer_id, from_account_id, to_account_id, amount, description, created_at";

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

/// DuckDB-backed account store and transfer ledger
///
/// Holds one base connection. Every unit of work runs on its own connection
/// cloned from the same database instance, so units that touch disjoint rows
/// do not wait on each other. Write-write conflicts on the same row are
/// reported by DuckDB and surface as [`Error::Conflict`].
pub struct DuckDbStore {
    conn: Mutex<Connection>,
}

impl DuckDbStore {
    /// Open (or create) a file-backed store
    ///
    /// Retries with exponential backoff when the file is locked by another
    /// process.
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            "Database busy, retrying in {}ms (attempt {}/{}): {}",
                            delay.as_millis(),
                            attempt + 1,
                            MAX_RETRIES,
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::database(format!("Failed to open database after {} retries", MAX_RETRIES))
        }))
    }

    /// Open a store that lives only as long as this value
    pub fn open_in_memory() -> Result<Self> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_in_memory_with_flags(config)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Extension autoloading stays off: nothing here needs extensions and
        // cached ones can fail code-signing checks on macOS.
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Ok(Connection::open_with_flags(db_path, config)?)
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock();
        let result = MigrationService::new(&conn).run_pending()?;
        if !result.applied.is_empty() {
            tracing::debug!(
                "Applied {} ledger migrations ({} already present)",
                result.applied.len(),
                result.already_applied
            );
        }
        Ok(())
    }

    /// Lock the base connection.
    ///
    /// A poisoned lock is recovered: units of work never write through the
    /// base connection, so a panic elsewhere cannot leave it mid-transaction.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a unit of work on a fresh connection to the same database
    pub fn begin_unit(&self) -> Result<DuckDbUnitOfWork> {
        let conn = self.lock().try_clone()?;
        DuckDbUnitOfWork::start(conn)
    }
}

impl LedgerStore for DuckDbStore {
    fn find_by_username(&self, username: &str) -> Result<Option<Account>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sys_accounts WHERE username = ?",
            ACCOUNT_COLUMNS
        ))?;
        let mut rows = stmt.query_map([username], row_to_account)?;
        let account = rows.next().transpose()?;
        Ok(account)
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sys_accounts ORDER BY username",
            ACCOUNT_COLUMNS
        ))?;
        let accounts = stmt
            .query_map([], row_to_account)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    fn seed_if_empty(&self, seeds: &[SeedAccount]) -> Result<usize> {
        let unit = self.begin_unit()?;
        let existing: i64 = unit
            .conn
            .query_row("SELECT COUNT(*) FROM sys_accounts", [], |row| row.get(0))?;
        if existing > 0 {
            return Ok(0);
        }

        for seed in seeds {
            let account = seed.clone().into_account();
            account.validate().map_err(Error::validation)?;
            insert_account(&unit.conn, &account)?;
        }
        Box::new(unit).commit()?;

        Ok(seeds.len())
    }

    fn list_transfers(&self, limit: usize) -> Result<Vec<Transfer>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sys_transfers ORDER BY created_at DESC LIMIT ?",
            TRANSFER_COLUMNS
        ))?;
        let transfers = stmt
            .query_map([limit as i64], row_to_transfer)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(transfers)
    }

    fn transfer_count(&self) -> Result<i64> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sys_transfers", [], |row| row.get(0))?;
        Ok(count)
    }

    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>> {
        Ok(Box::new(self.begin_unit()?))
    }
}

/// One explicit DuckDB transaction on a dedicated connection
///
/// Rolled back on drop unless [`UnitOfWork::commit`] succeeded.
pub struct DuckDbUnitOfWork {
    conn: Connection,
    finished: bool,
}

impl DuckDbUnitOfWork {
    fn start(conn: Connection) -> Result<Self> {
        conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(Self {
            conn,
            finished: false,
        })
    }
}

impl UnitOfWork for DuckDbUnitOfWork {
    fn balance(&mut self, account_id: Uuid) -> Result<Option<i64>> {
        let result = self.conn.query_row(
            "SELECT balance FROM sys_accounts WHERE account_id = ?",
            [account_id.to_string()],
            |row| row.get::<_, i64>(0),
        );
        match result {
            Ok(balance) => Ok(Some(balance)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_balance(&mut self, account_id: Uuid, new_balance: i64) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE sys_accounts SET balance = ?, updated_at = ? WHERE account_id = ?",
            params![new_balance, format_timestamp(&Utc::now()), account_id.to_string()],
        )?;
        if updated == 0 {
            return Err(Error::not_found(format!("account {}", account_id)));
        }
        Ok(())
    }

    fn append_transfer(&mut self, entry: &NewTransfer) -> Result<Transfer> {
        let transfer = entry.clone().into_transfer();
        self.conn.execute(
            &format!(
                "INSERT INTO sys_transfers ({}) VALUES (?, ?, ?, ?, ?, ?)",
                TRANSFER_COLUMNS
            ),
            params![
                transfer.id.to_string(),
                transfer.from_account_id.to_string(),
                transfer.to_account_id.to_string(),
                transfer.amount,
                transfer.description,
                format_timestamp(&transfer.created_at),
            ],
        )?;
        Ok(transfer)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for DuckDbUnitOfWork {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            // A failed COMMIT has already ended the transaction
            tracing::debug!("Rollback after aborted unit of work: {}", e);
        }
    }
}

fn insert_account(conn: &Connection, account: &Account) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO sys_accounts ({}) VALUES (?, ?, ?, ?, ?)",
            ACCOUNT_COLUMNS
        ),
        params![
            account.id.to_string(),
            account.username,
            account.balance,
            format_timestamp(&account.created_at),
            format_timestamp(&account.updated_at),
        ],
    )?;
    Ok(())
}

fn row_to_account(row: &duckdb::Row<'_>) -> duckdb::Result<Account> {
    // Column order: ACCOUNT_COLUMNS
    let created_str: String = row.get(3)?;
    let updated_str: String = row.get(4)?;
    Ok(Account {
        id: parse_uuid(row, 0)?,
        username: row.get(1)?,
        balance: row.get(2)?,
        created_at: parse_timestamp(&created_str),
        updated_at: parse_timestamp(&updated_str),
    })
}

fn row_to_transfer(row: &duckdb::Row<'_>) -> duckdb::Result<Transfer> {
    // Column order: TRANSFER_COLUMNS
    let created_str: String = row.get(5)?;
    Ok(Transfer {
        id: parse_uuid(row, 0)?,
        from_account_id: parse_uuid(row, 1)?,
        to_account_id: parse_uuid(row, 2)?,
        amount: row.get(3)?,
        description: row.get(4)?,
        created_at: parse_timestamp(&created_str),
    })
}

fn parse_uuid(row: &duckdb::Row<'_>, idx: usize) -> duckdb::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Fixed-width RFC 3339 so that timestamps sort lexically
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> DuckDbStore {
        let store = DuckDbStore::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        store.seed_if_empty(&SeedAccount::defaults()).unwrap();
        store
    }

    #[test]
    fn test_retryable_error_detection() {
        assert!(is_retryable_error("database is locked"));
        assert!(is_retryable_error(
            "The process cannot access the file because it is being used by another process"
        ));
        assert!(!is_retryable_error("Permission denied"));
    }

    #[test]
    fn test_seed_only_once() {
        let store = seeded_store();
        assert_eq!(store.seed_if_empty(&SeedAccount::defaults()).unwrap(), 0);

        let accounts = store.list_accounts().unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].username, "alice");
        assert_eq!(accounts[0].balance, 1000);
    }

    #[test]
    fn test_find_by_username() {
        let store = seeded_store();
        let bob = store.find_by_username("bob").unwrap().unwrap();
        assert_eq!(bob.balance, 1000);
        assert!(store.find_by_username("mallory").unwrap().is_none());
        // usernames are case-sensitive
        assert!(store.find_by_username("Bob").unwrap().is_none());
    }

    #[test]
    fn test_unit_commit_persists() {
        let store = seeded_store();
        let alice = store.find_by_username("alice").unwrap().unwrap();
        let bob = store.find_by_username("bob").unwrap().unwrap();

        let mut unit = store.begin().unwrap();
        unit.set_balance(alice.id, 900).unwrap();
        unit.set_balance(bob.id, 1100).unwrap();
        unit.append_transfer(&NewTransfer {
            from_account_id: alice.id,
            to_account_id: bob.id,
            amount: 100,
            description: "Transfer from alice to bob".to_string(),
        })
        .unwrap();
        unit.commit().unwrap();

        assert_eq!(store.find_by_username("alice").unwrap().unwrap().balance, 900);
        assert_eq!(store.find_by_username("bob").unwrap().unwrap().balance, 1100);
        assert_eq!(store.transfer_count().unwrap(), 1);

        let transfers = store.list_transfers(10).unwrap();
        assert_eq!(transfers[0].amount, 100);
        assert_eq!(transfers[0].from_account_id, alice.id);
    }

    #[test]
    fn test_unit_dropped_without_commit_rolls_back() {
        let store = seeded_store();
        let alice = store.find_by_username("alice").unwrap().unwrap();

        {
            let mut unit = store.begin().unwrap();
            unit.set_balance(alice.id, 0).unwrap();
            assert_eq!(unit.balance(alice.id).unwrap(), Some(0));
        }

        assert_eq!(store.find_by_username("alice").unwrap().unwrap().balance, 1000);
        assert_eq!(store.transfer_count().unwrap(), 0);
    }

    #[test]
    fn test_set_balance_unknown_account() {
        let store = seeded_store();
        let mut unit = store.begin().unwrap();
        let err = unit.set_balance(Uuid::new_v4(), 5).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(unit.balance(Uuid::new_v4()).unwrap(), None);
    }

    #[test]
    fn test_ledger_rejects_non_positive_amount() {
        let store = seeded_store();
        let alice = store.find_by_username("alice").unwrap().unwrap();
        let bob = store.find_by_username("bob").unwrap().unwrap();

        let mut unit = store.begin().unwrap();
        let result = unit.append_transfer(&NewTransfer {
            from_account_id: alice.id,
            to_account_id: bob.id,
            amount: 0,
            description: "bad".to_string(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let a = format_timestamp(&Utc::now());
        let b = format_timestamp(&DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z").unwrap().with_timezone(&Utc));
        assert_eq!(a.len(), b.len());
        assert_eq!(b, "2025-01-01T00:00:00.000000Z");
    }
}
