//! csrfbank - fund transfer demo service with an anti-forgery gate

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;
mod server;

use commands::{logs, serve, status, transfer};

/// csrfbank - transfers behind an unprotected and a token-gated entry point
#[derive(Parser)]
#[command(name = "csrfbank", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to listen on (overrides settings and CSRFBANK_BIND)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Show balances and recent transfers
    Status {
        /// Number of recent transfers to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Transfer funds between two accounts
    Transfer {
        /// Recipient username
        #[arg(long)]
        to: String,
        /// Amount in whole units
        #[arg(long, allow_hyphen_values = true)]
        amount: String,
        /// Sender username (defaults to the configured identity)
        #[arg(long)]
        from: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// View and manage the audit log
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

/// Diagnostics go to stderr; `RUST_LOG` overrides the default `info` level
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve { bind } => serve::run(bind),
        Commands::Status { limit, json } => status::run(json, limit),
        Commands::Transfer {
            to,
            amount,
            from,
            json,
        } => transfer::run(from, &to, &amount, json),
        Commands::Logs { command } => logs::run(command),
    }
}
