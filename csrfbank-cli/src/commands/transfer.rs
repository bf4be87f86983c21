//! Transfer command - move funds from the operator's terminal

use anyhow::{anyhow, Result};
use csrfbank_core::services::{EntryPoint, LogEvent};

use super::{get_context, log_event};
use crate::output;
use crate::server::types::TransferResponse;

pub fn run(from: Option<String>, to: &str, amount: &str, json: bool) -> Result<()> {
    let ctx = get_context(EntryPoint::Cli)?;
    log_event(&ctx.audit, LogEvent::new("command_executed").with_command("transfer"));

    let receipt = match ctx.unprotected_transfer(from.as_deref(), to, amount) {
        Ok(receipt) => receipt,
        Err(e) => {
            if json {
                println!("{}", serde_json::json!({ "error": e.to_string() }));
            }
            return Err(anyhow!(e));
        }
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&TransferResponse::from(receipt))?
        );
        return Ok(());
    }

    output::success(receipt.channel.success_message());
    let mut parties = vec![(receipt.from.username.as_str(), receipt.from.balance)];
    if receipt.to.username != receipt.from.username {
        parties.push((receipt.to.username.as_str(), receipt.to.balance));
    }
    let table = output::balance_table(parties);
    println!("{}", table);
    println!("Transfer ID: {}", receipt.transfer_id);

    Ok(())
}
