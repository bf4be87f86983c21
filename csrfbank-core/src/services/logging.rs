//! Audit log - transfer and server events in their own DuckDB file
//!
//! Entries never carry balances, amounts, usernames or tokens. A transfer is
//! recorded by outcome, channel and error code only, so the file can be
//! shared for debugging without leaking ledger contents.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use chrono::Utc;
use duckdb::types::Type;
use duckdb::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::log_migrations::LOG_MIGRATIONS;
use crate::services::MigrationService;

const LOG_FILE: &str = "logs.duckdb";

const ENTRY_COLUMNS: &str = "log_id, logged_at, entry_point, app_version, os, \
                             event, channel, command, error_code, error_message";

/// Which surface of the binary produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryPoint {
    Cli,
    Server,
}

impl EntryPoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryPoint::Cli => "cli",
            EntryPoint::Server => "server",
        }
    }
}

/// Event to append. Entry point, version and OS are filled in by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl LogEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            ..Self::default()
        }
    }

    /// Transfer channel, "safe" or "unsafe"
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// CLI subcommand that produced the event
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self.error_message = Some(message.into());
        self
    }
}

/// A stored audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    /// Unix time in milliseconds
    pub logged_at: i64,
    pub entry_point: String,
    pub app_version: String,
    pub os: String,
    pub event: String,
    pub channel: Option<String>,
    pub command: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Append-only audit log backed by `logs.duckdb`
pub struct LoggingService {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    entry_point: EntryPoint,
    app_version: String,
}

impl LoggingService {
    /// Open (or create) the audit log in `data_dir` and migrate it
    pub fn new(
        data_dir: &Path,
        entry_point: EntryPoint,
        app_version: impl Into<String>,
    ) -> Result<Self> {
        let db_path = data_dir.join(LOG_FILE);
        let conn = Connection::open(&db_path)?;
        MigrationService::with_migrations(&conn, LOG_MIGRATIONS).run_pending()?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            entry_point,
            app_version: app_version.into(),
        })
    }

    pub fn log(&self, event: LogEvent) -> Result<()> {
        self.lock().execute(
            &format!(
                "INSERT INTO sys_logs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                ENTRY_COLUMNS
            ),
            duckdb::params![
                Uuid::new_v4().to_string(),
                Utc::now().timestamp_millis(),
                self.entry_point.as_str(),
                self.app_version,
                std::env::consts::OS,
                event.event,
                event.channel,
                event.command,
                event.error_code,
                event.error_message,
            ],
        )?;
        Ok(())
    }

    /// Newest entries first
    pub fn recent(&self, limit: usize) -> Result<Vec<LogEntry>> {
        self.select("", limit)
    }

    /// Newest entries carrying an error code
    pub fn errors(&self, limit: usize) -> Result<Vec<LogEntry>> {
        self.select("WHERE error_code IS NOT NULL", limit)
    }

    pub fn count(&self) -> Result<u64> {
        self.count_where("")
    }

    pub fn error_count(&self) -> Result<u64> {
        self.count_where("WHERE error_code IS NOT NULL")
    }

    /// Remove entries logged before `cutoff_ms` (unix millis)
    pub fn delete_before(&self, cutoff_ms: i64) -> Result<u64> {
        let deleted = self
            .lock()
            .execute("DELETE FROM sys_logs WHERE logged_at < ?", [cutoff_ms])?;
        Ok(deleted as u64)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn select(&self, filter: &str, limit: usize) -> Result<Vec<LogEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sys_logs {} ORDER BY logged_at DESC LIMIT ?",
            ENTRY_COLUMNS, filter
        ))?;

        let entries = stmt
            .query_map([limit as i64], |row| {
                let id: String = row.get(0)?;
                Ok(LogEntry {
                    id: Uuid::parse_str(&id).map_err(|e| {
                        duckdb::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
                    })?,
                    logged_at: row.get(1)?,
                    entry_point: row.get(2)?,
                    app_version: row.get(3)?,
                    os: row.get(4)?,
                    event: row.get(5)?,
                    channel: row.get(6)?,
                    command: row.get(7)?,
                    error_code: row.get(8)?,
                    error_message: row.get(9)?,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn count_where(&self, filter: &str) -> Result<u64> {
        let count: i64 = self.lock().query_row(
            &format!("SELECT COUNT(*) FROM sys_logs {}", filter),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // Each statement is a single autocommitted insert or query; a panic
    // elsewhere cannot leave the connection mid-write.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
