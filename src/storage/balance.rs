//! Singleton balance row.
//!
//! `get_for_update` writes the row back to itself, which makes SQLite take the
//! database write lock at that point. The lock is held until the enclosing
//! transaction ends, so any other ledger mutation blocks in the busy handler
//! instead of reading a value that is about to change.

use rusqlite::{params, OptionalExtension, Transaction};

use crate::amount::Amount;
use crate::error::{LedgerError, LedgerResult};

const BALANCE_ROW_ID: i64 = 1;

/// Lock the balance row and return its current total.
pub fn get_for_update(tx: &Transaction<'_>) -> LedgerResult<Amount> {
    tx.query_row(
        "UPDATE balance SET total = total WHERE id = ?1 RETURNING total",
        params![BALANCE_ROW_ID],
        |row| row.get::<_, Amount>(0),
    )
    .optional()
    .map_err(|e| LedgerError::from_sqlite("lock balance", e))?
    .ok_or_else(|| {
        LedgerError::storage(
            "lock balance",
            std::io::Error::new(std::io::ErrorKind::NotFound, "balance row missing"),
        )
    })
}

/// Overwrite the stored total. Caller must already hold the lock.
pub fn set(tx: &Transaction<'_>, total: Amount) -> LedgerResult<()> {
    let updated = tx
        .execute(
            "UPDATE balance SET total = ?1 WHERE id = ?2",
            params![total, BALANCE_ROW_ID],
        )
        .map_err(|e| LedgerError::from_sqlite("write balance", e))?;
    if updated != 1 {
        return Err(LedgerError::storage(
            "write balance",
            std::io::Error::new(std::io::ErrorKind::NotFound, "balance row missing"),
        ));
    }
    Ok(())
}
