//! Transfer domain model (ledger entries and receipts)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::TransferError;

/// Which entry point produced a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferChannel {
    /// Plain entry point, no token check ("unsafe")
    Unprotected,
    /// Token-gated entry point ("safe")
    Protected,
}

impl TransferChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferChannel::Unprotected => "unsafe",
            TransferChannel::Protected => "safe",
        }
    }

    /// Ledger description for a transfer made through this channel
    pub fn describe(&self, from: &str, to: &str) -> String {
        match self {
            TransferChannel::Unprotected => format!("Transfer from {} to {}", from, to),
            TransferChannel::Protected => format!("Safe transfer from {} to {}", from, to),
        }
    }

    /// Message returned to the client on success
    pub fn success_message(&self) -> &'static str {
        match self {
            TransferChannel::Unprotected => "Transfer successful",
            TransferChannel::Protected => "Safe transfer successful",
        }
    }
}

/// A committed ledger entry. Append-only: never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: Uuid,
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub amount: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// A ledger entry to be appended inside a unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub amount: i64,
    pub description: String,
}

impl NewTransfer {
    pub fn into_transfer(self) -> Transfer {
        Transfer {
            id: Uuid::new_v4(),
            from_account_id: self.from_account_id,
            to_account_id: self.to_account_id,
            amount: self.amount,
            description: self.description,
            created_at: Utc::now(),
        }
    }
}

/// Username and balance of one side of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartySnapshot {
    pub username: String,
    pub balance: i64,
}

/// Post-commit snapshot returned to the caller of a successful transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: Uuid,
    pub channel: TransferChannel,
    pub from: PartySnapshot,
    pub to: PartySnapshot,
    pub amount: i64,
}

/// Parse a raw amount the way the form endpoints receive it.
///
/// Accepts an optional sign followed by decimal digits within `i64` range.
/// Anything else, including surrounding whitespace, is "Invalid amount";
/// zero and negatives are "Amount must be positive".
pub fn parse_amount(raw: &str) -> Result<i64, TransferError> {
    let amount: i64 = raw
        .parse()
        .map_err(|_| TransferError::InvalidAmount("Invalid amount".to_string()))?;
    if amount <= 0 {
        return Err(TransferError::InvalidAmount(
            "Amount must be positive".to_string(),
        ));
    }
    Ok(amount)
}
