//! Migration service - embedded schema migrations
//!
//! Serves both the ledger database and the audit log database. The first
//! migration of every set creates `sys_migrations` and is idempotent SQL, so
//! it is always executed; every later migration runs at most once, inside a
//! transaction together with the row that records it.

use std::collections::HashSet;

use duckdb::Connection;

use crate::domain::result::Result;
use crate::migrations::MIGRATIONS;

/// Outcome of [`MigrationService::run_pending`]
#[derive(Debug)]
pub struct MigrationResult {
    /// Migrations applied by this run, in order
    pub applied: Vec<String>,
    /// Migrations that had been applied before this run
    pub already_applied: usize,
}

pub struct MigrationService<'a> {
    conn: &'a Connection,
    migrations: &'static [(&'static str, &'static str)],
}

impl<'a> MigrationService<'a> {
    /// Runner for the ledger schema
    pub fn new(conn: &'a Connection) -> Self {
        Self::with_migrations(conn, MIGRATIONS)
    }

    pub fn with_migrations(
        conn: &'a Connection,
        migrations: &'static [(&'static str, &'static str)],
    ) -> Self {
        Self { conn, migrations }
    }

    pub fn run_pending(&self) -> Result<MigrationResult> {
        let Some(((bootstrap_name, bootstrap_sql), rest)) = self.migrations.split_first() else {
            return Ok(MigrationResult {
                applied: Vec::new(),
                already_applied: 0,
            });
        };

        self.conn.execute_batch(bootstrap_sql)?;
        let applied = self.applied_names()?;
        let mut result = MigrationResult {
            applied: Vec::new(),
            already_applied: applied.len(),
        };

        if !applied.contains(*bootstrap_name) {
            self.record(bootstrap_name)?;
            result.applied.push(bootstrap_name.to_string());
        }

        for (name, sql) in rest {
            if applied.contains(*name) {
                continue;
            }
            self.apply(name, sql)?;
            tracing::debug!("Applied migration {}", name);
            result.applied.push(name.to_string());
        }

        Ok(result)
    }

    fn apply(&self, name: &str, sql: &str) -> Result<()> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        let outcome = self
            .conn
            .execute_batch(sql)
            .map_err(Into::into)
            .and_then(|_| self.record(name));
        match outcome {
            Ok(()) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    tracing::debug!("Rollback of migration {} failed: {}", name, rollback);
                }
                Err(e)
            }
        }
    }

    fn record(&self, name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sys_migrations (migration_name) VALUES (?)",
            [name],
        )?;
        Ok(())
    }

    fn applied_names(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT migration_name FROM sys_migrations")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<duckdb::Result<HashSet<_>>>()?;
        Ok(names)
    }
}
