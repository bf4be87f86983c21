//! Logs command - inspect and prune the audit log

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Confirm;

use super::get_data_dir;
use crate::output;
use csrfbank_core::services::{EntryPoint, LogEntry, LoggingService};

#[derive(Subcommand)]
pub enum LogsCommands {
    /// Show recent audit entries
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Only entries with an error code
        #[arg(long)]
        errors: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete old audit entries
    Clear {
        /// Delete entries older than N days
        #[arg(long, default_value = "30")]
        older_than_days: u32,
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show entry counts and where the log lives
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: LogsCommands) -> Result<()> {
    let data_dir = get_data_dir()?;
    std::fs::create_dir_all(&data_dir)?;
    let service = LoggingService::new(&data_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION"))?;

    match command {
        LogsCommands::List {
            limit,
            errors,
            json,
        } => list(&service, limit, errors, json),
        LogsCommands::Clear {
            older_than_days,
            force,
            json,
        } => clear(&service, older_than_days, force, json),
        LogsCommands::Stats { json } => stats(&service, json),
    }
}

fn list(service: &LoggingService, limit: usize, errors_only: bool, json: bool) -> Result<()> {
    let entries = if errors_only {
        service.errors(limit)?
    } else {
        service.recent(limit)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No audit entries.");
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["Time", "Source", "Event", "Context", "Error"]);
    for entry in &entries {
        let error = match (&entry.error_code, &entry.error_message) {
            (Some(code), Some(message)) => format!("{} {}", code.red(), message),
            (Some(code), None) => code.red().to_string(),
            _ => String::new(),
        };
        table.add_row(vec![
            format_millis(entry.logged_at),
            entry.entry_point.clone(),
            entry.event.clone(),
            entry_context(entry),
            error,
        ]);
    }
    println!("{}", table);
    Ok(())
}

fn clear(service: &LoggingService, older_than_days: u32, force: bool, json: bool) -> Result<()> {
    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete audit entries older than {} days?",
                older_than_days
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let cutoff = Utc::now() - Duration::days(i64::from(older_than_days));
    let deleted = service.delete_before(cutoff.timestamp_millis())?;

    if json {
        println!("{}", serde_json::json!({ "deleted": deleted }));
    } else {
        output::success(&format!("Deleted {} audit entries", deleted));
    }
    Ok(())
}

fn stats(service: &LoggingService, json: bool) -> Result<()> {
    let total = service.count()?;
    let errors = service.error_count()?;
    let size_bytes = std::fs::metadata(service.db_path())
        .map(|m| m.len())
        .unwrap_or(0);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "total_entries": total,
                "error_entries": errors,
                "database_path": service.db_path().to_string_lossy(),
                "database_size_bytes": size_bytes,
            })
        );
        return Ok(());
    }

    println!("{}", "Audit Log".bold());
    let mut table = output::create_table();
    table.add_row(vec!["Entries", &total.to_string()]);
    table.add_row(vec!["With errors", &errors.to_string()]);
    table.add_row(vec!["File", &service.db_path().display().to_string()]);
    table.add_row(vec!["Size", &output::format_size(size_bytes)]);
    println!("{}", table);
    Ok(())
}

fn format_millis(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// Channel and command of an entry, comma separated
fn entry_context(entry: &LogEntry) -> String {
    [entry.channel.as_deref(), entry.command.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ")
}
