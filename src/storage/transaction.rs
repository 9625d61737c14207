//! Transaction scope: commit on success, roll back on error or unwind.

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::{LedgerError, LedgerResult};

/// Locking mode taken at `BEGIN`. SQLite's stand-in for an isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxMode {
    /// Locks are acquired lazily by the first read/write.
    #[default]
    Deferred,
    /// Takes the write lock at `BEGIN`; other writers block until commit.
    Immediate,
    /// Also blocks readers outside WAL mode.
    Exclusive,
}

impl From<TxMode> for TransactionBehavior {
    fn from(mode: TxMode) -> Self {
        match mode {
            TxMode::Deferred => TransactionBehavior::Deferred,
            TxMode::Immediate => TransactionBehavior::Immediate,
            TxMode::Exclusive => TransactionBehavior::Exclusive,
        }
    }
}

/// Run `work` inside a transaction.
///
/// The rusqlite `Transaction` rolls back when dropped, so an early `?` return or a
/// panic inside `work` leaves nothing behind.
pub fn with_transaction<T, F>(conn: &mut Connection, mode: TxMode, work: F) -> LedgerResult<T>
where
    F: FnOnce(&Transaction<'_>) -> LedgerResult<T>,
{
    let tx = conn
        .transaction_with_behavior(mode.into())
        .map_err(|e| LedgerError::from_sqlite("begin transaction", e))?;

    let value = work(&tx)?;

    tx.commit()
        .map_err(|e| LedgerError::from_sqlite("commit failed", e))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (v INTEGER NOT NULL)", [])
            .unwrap();
        conn
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_commits_on_success() {
        let mut conn = scratch();
        let out = with_transaction(&mut conn, TxMode::Immediate, |tx| {
            tx.execute("INSERT INTO t (v) VALUES (1)", [])
                .map_err(|e| LedgerError::from_sqlite("insert", e))?;
            Ok(7)
        })
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_rolls_back_on_error() {
        let mut conn = scratch();
        let err = with_transaction(&mut conn, TxMode::Deferred, |tx| {
            tx.execute("INSERT INTO t (v) VALUES (1)", [])
                .map_err(|e| LedgerError::from_sqlite("insert", e))?;
            Err::<(), _>(LedgerError::Validation("nope".to_string()))
        })
        .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn test_rolls_back_on_panic() {
        let mut conn = scratch();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = with_transaction(&mut conn, TxMode::Deferred, |tx| -> LedgerResult<()> {
                tx.execute("INSERT INTO t (v) VALUES (1)", []).unwrap();
                panic!("boom");
            });
        }));
        assert!(result.is_err());
        assert_eq!(count(&conn), 0);
    }
}
