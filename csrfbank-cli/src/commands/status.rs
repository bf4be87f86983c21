//! Status command - show balances and recent transfers

use anyhow::Result;
use colored::Colorize;
use csrfbank_core::services::EntryPoint;

use super::get_context;
use crate::output;

pub fn run(json: bool, limit: usize) -> Result<()> {
    let ctx = get_context(EntryPoint::Cli)?;
    let status = ctx.status_service.get_status_with_limit(limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", "Ledger Status".bold());
    println!();

    let mut table = output::create_table();
    table.add_row(vec!["Accounts", &status.total_accounts.to_string()]);
    table.add_row(vec!["Total balance", &status.total_balance.to_string()]);
    table.add_row(vec!["Transfers", &status.total_transfers.to_string()]);
    println!("{}", table);
    println!();

    let accounts = output::balance_table(
        status
            .accounts
            .iter()
            .map(|a| (a.username.as_str(), a.balance)),
    );
    println!("{}", accounts);

    if !status.recent_transfers.is_empty() {
        println!();
        println!("{}", "Recent Transfers".bold());
        let mut transfers = output::create_table();
        transfers.set_header(vec!["Time", "From", "To", "Amount", "Description"]);
        for t in &status.recent_transfers {
            transfers.add_row(vec![
                t.created_at.clone(),
                t.from.clone(),
                t.to.clone(),
                t.amount.to_string(),
                t.description.clone(),
            ]);
        }
        println!("{}", transfers);
    }

    Ok(())
}
