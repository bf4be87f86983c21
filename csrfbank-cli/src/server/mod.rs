//! HTTP entry points
//!
//! - `POST /transfer/unsafe` form `to`, `amount`
//! - `POST /transfer/safe` same form plus the `X-CSRF-Token` header
//! - `GET /csrf-token` issue a token for the demo identity
//! - `GET /status` balances and recent ledger entries

pub mod handlers;
pub mod state;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;

pub use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/transfer/unsafe", post(handlers::unsafe_transfer))
        .route("/transfer/safe", post(handlers::safe_transfer))
        .route("/csrf-token", get(handlers::csrf_token))
        .route("/status", get(handlers::status))
        .with_state(state)
}

/// Serve until Ctrl-C
pub async fn serve(state: Arc<AppState>, bind_address: &str) -> Result<()> {
    let listener = TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;

    tracing::info!("csrfbank listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("csrfbank stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
