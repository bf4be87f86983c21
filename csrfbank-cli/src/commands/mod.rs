//! CLI command implementations

pub mod logs;
pub mod serve;
pub mod status;
pub mod transfer;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use csrfbank_core::services::{EntryPoint, LogEvent, LoggingService};
use csrfbank_core::BankContext;

/// Get the logging service for the given entry point
///
/// Returns None if logging fails to initialize (shouldn't block operations)
pub fn get_logger(entry_point: EntryPoint) -> Option<LoggingService> {
    let data_dir = get_data_dir().ok()?;
    std::fs::create_dir_all(&data_dir).ok()?;
    LoggingService::new(&data_dir, entry_point, env!("CARGO_PKG_VERSION")).ok()
}

/// Log an event, ignoring any errors (logging should never break the app)
pub fn log_event(logger: &Option<Arc<LoggingService>>, event: LogEvent) {
    if let Some(l) = logger {
        let _ = l.log(event);
    }
}

/// Get the data directory from environment or default
pub fn get_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("CSRFBANK_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".csrfbank"))
        .ok_or_else(|| anyhow!("Could not find home directory; set CSRFBANK_DIR"))
}

/// Open the bank context, with the audit log attached when available
pub fn get_context(entry_point: EntryPoint) -> Result<BankContext> {
    let data_dir = get_data_dir()?;

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

    let ctx = BankContext::new(&data_dir).context("Failed to initialize bank context")?;

    Ok(match get_logger(entry_point) {
        Some(logger) => ctx.with_audit_log(Arc::new(logger)),
        None => ctx,
    })
}
