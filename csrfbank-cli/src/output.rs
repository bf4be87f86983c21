//! Terminal output helpers

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL_CONDENSED, CellAlignment, ContentArrangement, Table};

pub fn success(msg: &str) {
    println!("{}", msg.green());
}

/// Errors go to stderr so `--json` output on stdout stays parseable
pub fn error(msg: &str) {
    eprintln!("{} {}", "error:".red().bold(), msg);
}

pub fn info(msg: &str) {
    println!("{}", msg.cyan());
}

pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Username / balance table with right-aligned balances
pub fn balance_table<'a>(rows: impl IntoIterator<Item = (&'a str, i64)>) -> Table {
    let mut table = create_table();
    table.set_header(vec!["Account", "Balance"]);
    for (username, balance) in rows {
        table.add_row(vec![username.to_string(), balance.to_string()]);
    }
    if let Some(column) = table.column_mut(1) {
        column.set_cell_alignment(CellAlignment::Right);
    }
    table
}

/// Human-readable byte count, e.g. `12.0 KB`
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];

    if bytes < 1024 {
        return format!("{} bytes", bytes);
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit + 1 < UNITS.len() {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}
