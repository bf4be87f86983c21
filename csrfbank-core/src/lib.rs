//! CSRF Bank Core - fund transfers behind an anti-forgery gate
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Core business entities (Account, Transfer, receipts, errors)
//! - **ports**: Trait definitions for storage (LedgerStore, UnitOfWork)
//! - **services**: Business logic orchestration (transfers, tokens, status)
//! - **adapters**: Concrete implementations (DuckDB, in-memory)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use adapters::duckdb::DuckDbStore;
use config::Config;
use ports::LedgerStore;
use services::*;

// Re-export commonly used types at crate root
pub use domain::result::{Error, TransferError};
pub use domain::{
    Account, PartySnapshot, SeedAccount, Transfer, TransferChannel, TransferReceipt,
};

/// Main context for bank operations
///
/// This is the primary entry point for all business logic. It holds the
/// store, configuration, token table and all services.
pub struct BankContext {
    pub config: Config,
    pub store: Arc<dyn LedgerStore>,
    pub transfer_engine: TransferEngine,
    pub tokens: TokenStore,
    pub status_service: StatusService,
    pub audit: Option<Arc<LoggingService>>,
}

impl BankContext {
    /// Open the ledger in `data_dir`, migrate it and seed it on first run
    pub fn new(data_dir: &Path) -> Result<Self> {
        let config = Config::load(data_dir)?;

        let db_path = data_dir.join(&config.database_file);
        let store = DuckDbStore::new(&db_path)?;
        store.ensure_schema()?;

        let seeded = store.seed_if_empty(&config.seed_accounts)?;
        if seeded > 0 {
            tracing::info!("Seeded {} accounts into {}", seeded, db_path.display());
        }

        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Context over an already prepared store
    pub fn with_store(config: Config, store: Arc<dyn LedgerStore>) -> Self {
        let transfer_engine =
            TransferEngine::new(Arc::clone(&store), config.default_identity.clone());
        let status_service = StatusService::new(Arc::clone(&store));

        Self {
            config,
            store,
            transfer_engine,
            tokens: TokenStore::new(),
            status_service,
            audit: None,
        }
    }

    /// Record transfer outcomes in the given audit log
    pub fn with_audit_log(mut self, audit: Arc<LoggingService>) -> Self {
        self.transfer_engine = self.transfer_engine.with_audit_log(Arc::clone(&audit));
        self.audit = Some(audit);
        self
    }

    /// Acting identity for a request; see [`TransferEngine::resolve_identity`]
    pub fn resolve_identity<'a>(&'a self, acting_identity: Option<&'a str>) -> &'a str {
        self.transfer_engine.resolve_identity(acting_identity)
    }

    /// Issue a fresh anti-forgery token for the resolved identity
    pub fn issue_token(&self, acting_identity: Option<&str>) -> (String, String) {
        let identity = self.resolve_identity(acting_identity).to_string();
        let token = self.tokens.issue(&identity);
        (identity, token)
    }

    /// Transfer without any token check
    pub fn unprotected_transfer(
        &self,
        acting_identity: Option<&str>,
        recipient: &str,
        amount_raw: &str,
    ) -> std::result::Result<TransferReceipt, TransferError> {
        self.transfer_engine.execute_transfer(
            acting_identity,
            recipient,
            amount_raw,
            TransferChannel::Unprotected,
        )
    }

    /// Transfer gated on the token issued to the acting identity
    ///
    /// The gate runs first: a rejected token returns before any account is
    /// looked up or any state is touched.
    pub fn protected_transfer(
        &self,
        acting_identity: Option<&str>,
        presented_token: Option<&str>,
        recipient: &str,
        amount_raw: &str,
    ) -> std::result::Result<TransferReceipt, TransferError> {
        let identity = self.resolve_identity(acting_identity);
        if !self.tokens.verify(identity, presented_token).is_authorized() {
            tracing::info!(
                code = TransferError::AuthorizationRejected.code(),
                "protected transfer rejected by gate"
            );
            if let Some(audit) = &self.audit {
                let event = LogEvent::new("transfer_rejected")
                    .with_channel(TransferChannel::Protected.as_str())
                    .with_error(
                        TransferError::AuthorizationRejected.code(),
                        TransferError::AuthorizationRejected.to_string(),
                    );
                if let Err(e) = audit.log(event) {
                    tracing::warn!("Failed to write audit event: {}", e);
                }
            }
            return Err(TransferError::AuthorizationRejected);
        }

        self.transfer_engine.execute_transfer(
            Some(identity),
            recipient,
            amount_raw,
            TransferChannel::Protected,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;

    fn context() -> BankContext {
        let store = Arc::new(MemoryStore::with_seeds(&SeedAccount::defaults()));
        BankContext::with_store(Config::default(), store)
    }

    #[test]
    fn test_protected_transfer_requires_token() {
        let ctx = context();

        assert_eq!(
            ctx.protected_transfer(None, None, "bob", "100"),
            Err(TransferError::AuthorizationRejected)
        );

        let (identity, token) = ctx.issue_token(None);
        assert_eq!(identity, "alice");
        assert_eq!(
            ctx.protected_transfer(None, Some("forged"), "bob", "100"),
            Err(TransferError::AuthorizationRejected)
        );

        let receipt = ctx
            .protected_transfer(None, Some(&token), "bob", "100")
            .unwrap();
        assert_eq!(receipt.channel, TransferChannel::Protected);
        assert_eq!(receipt.from.balance, 900);
    }

    #[test]
    fn test_gate_runs_before_validation() {
        let ctx = context();
        // an unparseable amount and unknown recipient still report the gate
        assert_eq!(
            ctx.protected_transfer(None, None, "nobody", "abc"),
            Err(TransferError::AuthorizationRejected)
        );
    }

    #[test]
    fn test_unprotected_transfer_ignores_tokens() {
        let ctx = context();
        let receipt = ctx.unprotected_transfer(None, "bob", "100").unwrap();
        assert_eq!(receipt.channel, TransferChannel::Unprotected);
        assert_eq!(receipt.to.balance, 1100);
    }

    #[test]
    fn test_token_is_scoped_to_issuing_identity() {
        let ctx = context();
        let (_, bob_token) = ctx.issue_token(Some("bob"));
        assert_eq!(
            ctx.protected_transfer(Some("alice"), Some(&bob_token), "bob", "1"),
            Err(TransferError::AuthorizationRejected)
        );
        assert!(ctx
            .protected_transfer(Some("bob"), Some(&bob_token), "alice", "1")
            .is_ok());
    }
}
