//! Transfer engine - validated, atomic fund movement between two accounts
//!
//! Validation runs against committed state in a fixed order so that error
//! precedence is deterministic:
//!
//! 1. amount parses as an integer            -> `InvalidAmount`
//! 2. amount is strictly positive            -> `InvalidAmount`
//! 3. acting identity names an account       -> `InvalidSender`
//! 4. recipient names an account             -> `InvalidRecipient`
//! 5. sender balance covers the amount       -> `InsufficientBalance`
//!
//! The balance update then runs inside one unit of work. The sender balance
//! is read again inside the unit and the precondition re-checked there, so two
//! transfers racing on the same source cannot both pass on a stale read.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::domain::result::Error;
use crate::domain::{
    parse_amount, Account, NewTransfer, PartySnapshot, TransferChannel, TransferError,
    TransferReceipt,
};
use crate::ports::LedgerStore;
use crate::services::logging::{LogEvent, LoggingService};

/// How long a transfer keeps retrying after write conflicts before it
/// reports `CommitFailure`
const CONFLICT_RETRY_WINDOW: Duration = Duration::from_secs(10);

/// Backoff ceiling for the first retry, doubled per attempt up to
/// `MAX_RETRY_DELAY_MS`. The actual sleep is drawn uniformly below the
/// ceiling so that units which collided once do not wake together.
const INITIAL_RETRY_DELAY_MS: u64 = 2;

const MAX_RETRY_DELAY_MS: u64 = 100;

/// Failure of a single attempt at the atomic unit
enum AttemptError {
    /// A precondition failed inside the unit; not retried
    Rejected(TransferError),
    /// The store failed; retried when it is a write conflict
    Store(Error),
}

impl From<Error> for AttemptError {
    fn from(err: Error) -> Self {
        AttemptError::Store(err)
    }
}

/// Transfer engine
pub struct TransferEngine {
    store: Arc<dyn LedgerStore>,
    default_identity: String,
    audit: Option<Arc<LoggingService>>,
}

impl TransferEngine {
    pub fn new(store: Arc<dyn LedgerStore>, default_identity: impl Into<String>) -> Self {
        Self {
            store,
            default_identity: default_identity.into(),
            audit: None,
        }
    }

    /// Record transfer outcomes in the audit log as well
    pub fn with_audit_log(mut self, audit: Arc<LoggingService>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Resolve the acting identity.
    ///
    /// DEMO SIMPLIFICATION: there is no session layer, so a missing or empty
    /// identity acts as the configured default user instead of being
    /// rejected. This is not an authentication fallback.
    pub fn resolve_identity<'a>(&'a self, acting_identity: Option<&'a str>) -> &'a str {
        match acting_identity {
            Some(identity) if !identity.is_empty() => identity,
            _ => &self.default_identity,
        }
    }

    /// Move `amount_raw` from the acting account to `recipient`
    ///
    /// On failure nothing is mutated. Not idempotent: repeating a request
    /// performs a second transfer.
    pub fn execute_transfer(
        &self,
        acting_identity: Option<&str>,
        recipient: &str,
        amount_raw: &str,
        channel: TransferChannel,
    ) -> Result<TransferReceipt, TransferError> {
        let result = self
            .validate(acting_identity, recipient, amount_raw)
            .and_then(|(from, to, amount)| self.apply(&from, &to, amount, channel));

        match &result {
            Ok(receipt) => {
                tracing::info!(
                    transfer_id = %receipt.transfer_id,
                    channel = channel.as_str(),
                    "transfer committed"
                );
                self.audit(LogEvent::new("transfer_committed").with_channel(channel.as_str()));
            }
            Err(e) => {
                // Bad requests and store faults are separate audit events
                let event = if e.is_client_error() {
                    tracing::info!(code = e.code(), channel = channel.as_str(), "transfer rejected");
                    "transfer_rejected"
                } else {
                    tracing::error!(code = e.code(), channel = channel.as_str(), error = ?e, "transfer failed");
                    "transfer_failed"
                };
                self.audit(
                    LogEvent::new(event)
                        .with_channel(channel.as_str())
                        .with_error(e.code(), e.to_string()),
                );
            }
        }

        result
    }

    /// Steps 1-5 against committed state
    fn validate(
        &self,
        acting_identity: Option<&str>,
        recipient: &str,
        amount_raw: &str,
    ) -> Result<(Account, Account, i64), TransferError> {
        let amount = parse_amount(amount_raw)?;

        let from = self
            .lookup(self.resolve_identity(acting_identity))?
            .ok_or(TransferError::InvalidSender)?;
        let to = self
            .lookup(recipient)?
            .ok_or(TransferError::InvalidRecipient)?;

        if !from.can_cover(amount) {
            return Err(TransferError::InsufficientBalance);
        }

        Ok((from, to, amount))
    }

    fn lookup(&self, username: &str) -> Result<Option<Account>, TransferError> {
        self.store
            .find_by_username(username)
            .map_err(|e| TransferError::CommitFailure(e.to_string()))
    }

    /// Steps 6-10, retrying the whole unit on write conflicts
    ///
    /// Every retry re-reads both balances, so a retried debit either commits
    /// against the current balance or fails its precondition.
    fn apply(
        &self,
        from: &Account,
        to: &Account,
        amount: i64,
        channel: TransferChannel,
    ) -> Result<TransferReceipt, TransferError> {
        let deadline = Instant::now() + CONFLICT_RETRY_WINDOW;
        let mut attempt: u32 = 0;
        loop {
            match self.try_apply(from, to, amount, channel) {
                Ok(receipt) => {
                    if attempt > 0 {
                        tracing::debug!("Transfer committed after {} conflict retries", attempt);
                    }
                    return Ok(receipt);
                }
                Err(AttemptError::Rejected(e)) => return Err(e),
                Err(AttemptError::Store(e)) if e.is_conflict() && Instant::now() < deadline => {
                    let delay = retry_delay(attempt);
                    tracing::debug!(
                        "Transfer conflicted with a concurrent unit, retrying in {}ms (attempt {}): {}",
                        delay.as_millis(),
                        attempt + 1,
                        e
                    );
                    thread::sleep(delay);
                    attempt = attempt.saturating_add(1);
                }
                Err(AttemptError::Store(e)) => {
                    if e.is_conflict() {
                        tracing::warn!(
                            "Transfer still conflicting after {} retries, giving up",
                            attempt
                        );
                    }
                    return Err(TransferError::CommitFailure(e.to_string()));
                }
            }
        }
    }

    /// One attempt at the atomic unit. Any early return drops the unit,
    /// which rolls it back.
    fn try_apply(
        &self,
        from: &Account,
        to: &Account,
        amount: i64,
        channel: TransferChannel,
    ) -> Result<TransferReceipt, AttemptError> {
        let mut unit = self.store.begin()?;

        let from_balance = unit
            .balance(from.id)?
            .ok_or(AttemptError::Rejected(TransferError::InvalidSender))?;
        if from_balance < amount {
            return Err(AttemptError::Rejected(TransferError::InsufficientBalance));
        }
        let debited = from_balance - amount;
        unit.set_balance(from.id, debited)?;

        // Read after the debit so a transfer to oneself nets to zero
        let to_balance = unit
            .balance(to.id)?
            .ok_or(AttemptError::Rejected(TransferError::InvalidRecipient))?;
        let credited = to_balance
            .checked_add(amount)
            .ok_or_else(|| Error::validation(format!("balance overflow on account {}", to.id)))?;
        unit.set_balance(to.id, credited)?;

        let transfer = unit.append_transfer(&NewTransfer {
            from_account_id: from.id,
            to_account_id: to.id,
            amount,
            description: channel.describe(&from.username, &to.username),
        })?;

        unit.commit()?;

        let from_after = if from.id == to.id { credited } else { debited };
        Ok(TransferReceipt {
            transfer_id: transfer.id,
            channel,
            from: PartySnapshot {
                username: from.username.clone(),
                balance: from_after,
            },
            to: PartySnapshot {
                username: to.username.clone(),
                balance: credited,
            },
            amount,
        })
    }

    /// Audit logging never fails a transfer
    fn audit(&self, event: LogEvent) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log(event) {
                tracing::warn!("Failed to write audit event: {}", e);
            }
        }
    }
}

/// Jittered exponential backoff for the given retry attempt
fn retry_delay(attempt: u32) -> Duration {
    let ceiling = INITIAL_RETRY_DELAY_MS
        .saturating_mul(1u64 << attempt.min(16))
        .min(MAX_RETRY_DELAY_MS);
    Duration::from_millis(rand::thread_rng().gen_range(1..=ceiling))
}
