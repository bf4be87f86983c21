//! Result and error types for the core library

use thiserror::Error;

/// Store and infrastructure error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(String),

    /// A concurrent unit of work touched the same rows first; the unit may be retried.
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<duckdb::Error> for Error {
    fn from(err: duckdb::Error) -> Self {
        let msg = err.to_string();
        if is_conflict_message(&msg) {
            Self::Conflict(msg)
        } else {
            Self::Database(msg)
        }
    }
}

/// DuckDB reports optimistic concurrency failures as "Conflict on update",
/// "write-write conflict" and similar.
fn is_conflict_message(msg: &str) -> bool {
    msg.to_lowercase().contains("conflict")
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;

/// Failure outcomes of a transfer request.
///
/// Every variant is recoverable at the request boundary. The `Display` text is
/// the message shown to clients.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Unparseable or non-positive amount; carries the client-facing reason.
    #[error("{0}")]
    InvalidAmount(String),

    #[error("Invalid sender")]
    InvalidSender,

    #[error("Invalid recipient")]
    InvalidRecipient,

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Invalid CSRF token")]
    AuthorizationRejected,

    /// The atomic unit could not complete and was rolled back.
    #[error("Transfer failed")]
    CommitFailure(String),
}

impl TransferError {
    /// Stable error code for audit records
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidAmount(_) => "INVALID_AMOUNT",
            TransferError::InvalidSender => "INVALID_SENDER",
            TransferError::InvalidRecipient => "INVALID_RECIPIENT",
            TransferError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            TransferError::AuthorizationRejected => "AUTHORIZATION_REJECTED",
            TransferError::CommitFailure(_) => "COMMIT_FAILURE",
        }
    }

    /// Whether the failure was caused by the request rather than the store
    pub fn is_client_error(&self) -> bool {
        !matches!(self, TransferError::CommitFailure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_detection() {
        assert!(is_conflict_message("TransactionContext Error: Conflict on update!"));
        assert!(is_conflict_message("Catalog write-write conflict on alter"));
        assert!(!is_conflict_message("Constraint Error: duplicate key"));
    }

    #[test]
    fn test_transfer_error_messages() {
        assert_eq!(TransferError::InvalidSender.to_string(), "Invalid sender");
        assert_eq!(
            TransferError::InvalidAmount("Amount must be positive".into()).to_string(),
            "Amount must be positive"
        );
        assert_eq!(
            TransferError::CommitFailure("disk full".into()).to_string(),
            "Transfer failed"
        );
    }

    #[test]
    fn test_client_error_classification() {
        assert!(TransferError::InsufficientBalance.is_client_error());
        assert!(TransferError::AuthorizationRejected.is_client_error());
        assert!(!TransferError::CommitFailure(String::new()).is_client_error());
        assert_eq!(TransferError::InvalidRecipient.code(), "INVALID_RECIPIENT");
    }
}
