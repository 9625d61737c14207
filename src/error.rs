//! Ledger error taxonomy.
//!
//! Business outcomes (`Validation`, `InsufficientBalance`) are never retried.
//! `TransientConflict` is the only variant the retry executor loops on.

use std::time::Duration;

use crate::amount::Amount;

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[derive(Debug)]
pub enum LedgerError {
    /// Malformed or contradictory event, rejected before any transaction opens.
    Validation(String),
    /// Applying the change would drive the balance below zero.
    InsufficientBalance { balance: Amount, delta: Amount },
    /// Database contention (busy/locked). Safe to retry.
    TransientConflict(rusqlite::Error),
    /// Retry executor gave up; carries the last error seen.
    RetriesExhausted {
        attempts: u32,
        last: Box<LedgerError>,
    },
    /// Status update failed after the balance check had already passed.
    Cancellation(String),
    /// Any other persistence failure, with the operation that hit it.
    Storage {
        context: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The unit of work ran past its deadline and was rolled back.
    DeadlineExceeded(Duration),
}

impl LedgerError {
    pub fn storage<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Classify a raw SQLite error, attaching `context` unless it is contention.
    pub fn from_sqlite(context: impl Into<String>, err: rusqlite::Error) -> Self {
        if is_transient_sqlite(&err) {
            Self::TransientConflict(err)
        } else {
            Self::storage(context, err)
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientConflict(_))
    }

    pub fn is_insufficient_balance(&self) -> bool {
        match self {
            Self::InsufficientBalance { .. } => true,
            Self::RetriesExhausted { last, .. } => last.is_insufficient_balance(),
            _ => false,
        }
    }
}

/// SQLITE_BUSY / SQLITE_LOCKED and their extended codes (e.g. BUSY_SNAPSHOT).
pub fn is_transient_sqlite(err: &rusqlite::Error) -> bool {
    use rusqlite::ErrorCode;
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        }
        _ => false,
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "validation failed: {}", msg),
            Self::InsufficientBalance { balance, delta } => write!(
                f,
                "balance cannot be negative (balance {}, change {})",
                balance, delta
            ),
            Self::TransientConflict(e) => write!(f, "transient database conflict: {}", e),
            Self::RetriesExhausted { attempts, last } => {
                write!(f, "after {} attempts: {}", attempts, last)
            }
            Self::Cancellation(msg) => write!(f, "cancellation failed: {}", msg),
            Self::Storage { context, source } => write!(f, "{}: {}", context, source),
            Self::DeadlineExceeded(d) => write!(f, "deadline of {:?} exceeded", d),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TransientConflict(e) => Some(e),
            Self::RetriesExhausted { last, .. } => Some(last.as_ref()),
            Self::Storage { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
