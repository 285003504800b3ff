//! Ledger error types

use thiserror::Error;

/// Errors produced by the purchase ledger and webhook reconciler
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The webhook body could not be understood as a JSON object.
    /// This is a client error; nothing was written.
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    /// A purchase row carried a status string outside the known vocabulary
    #[error("Unrecognized purchase status: {0}")]
    InvalidStatus(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Database(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for LedgerError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        LedgerError::Migration(e.to_string())
    }
}

impl LedgerError {
    /// Whether this error is caused by the caller's input rather than by
    /// infrastructure. Client errors are never worth redelivering.
    pub fn is_client_error(&self) -> bool {
        matches!(self, LedgerError::MalformedPayload(_))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
