//! Serve command - run the HTTP entry points

use std::sync::Arc;

use anyhow::{Context, Result};
use csrfbank_core::services::{EntryPoint, LogEvent};

use super::{get_context, log_event};
use crate::output;
use crate::server::{self, AppState};

pub fn run(bind: Option<String>) -> Result<()> {
    let ctx = get_context(EntryPoint::Server)?;
    let bind_address = bind.unwrap_or_else(|| ctx.config.bind_address.clone());
    let audit = ctx.audit.clone();

    output::info(&format!(
        "Acting identity for all requests: {} (no sessions)",
        ctx.config.default_identity
    ));

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    log_event(&audit, LogEvent::new("server_started"));
    let result = runtime.block_on(server::serve(Arc::new(AppState::new(ctx)), &bind_address));

    match &result {
        Ok(()) => log_event(&audit, LogEvent::new("server_stopped")),
        Err(e) => log_event(
            &audit,
            LogEvent::new("server_stopped").with_error("SERVER_ERROR", e.to_string()),
        ),
    }

    result
}
