//! SQLite persistence for the ledger.
//!
//! Every unit of work opens its own connection from [`Database`], so concurrent
//! writers really do contend in SQLite and block on the balance lock.

pub mod balance;
pub mod retry;
pub mod transaction;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::time::Duration;
use tracing::{info, warn};

use crate::amount::Amount;
use crate::error::{LedgerError, LedgerResult};

pub use retry::{retry, RetryPolicy};
pub use transaction::{with_transaction, TxMode};

/// Handle to the ledger database file.
#[derive(Debug, Clone)]
pub struct Database {
    db_path: String,
    busy_timeout: Duration,
}

impl Database {
    /// Open (creating if needed) the database and provision the schema.
    pub fn open(db_path: &str, busy_timeout: Duration) -> Result<Self> {
        let db = Self {
            db_path: db_path.to_string(),
            busy_timeout,
        };
        let conn = Connection::open(&db.db_path)
            .with_context(|| format!("open ledger db at {}", db.db_path))?;
        match conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        }) {
            Ok(mode) if mode.eq_ignore_ascii_case("wal") => {}
            Ok(mode) => warn!(path = %db.db_path, mode = %mode, "WAL journal mode not available"),
            Err(e) => warn!(path = %db.db_path, "Failed to enable WAL journal mode: {}", e),
        }
        if let Err(e) = conn.pragma_update(None, "synchronous", "NORMAL") {
            warn!(path = %db.db_path, "Failed to set synchronous=NORMAL: {}", e);
        }
        init_schema(&conn).context("provision ledger schema")?;

        info!(path = %db.db_path, "Ledger database ready");
        Ok(db)
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Fresh connection with the busy handler armed.
    pub fn connect(&self) -> LedgerResult<Connection> {
        self.connect_with_busy_timeout(self.busy_timeout)
    }

    /// Like [`connect`](Self::connect), but lock waits give up after `busy_timeout`.
    pub fn connect_with_busy_timeout(&self, busy_timeout: Duration) -> LedgerResult<Connection> {
        let conn = Connection::open(&self.db_path)
            .map_err(|e| LedgerError::from_sqlite("open connection", e))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| LedgerError::from_sqlite("set busy timeout", e))?;
        Ok(conn)
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            state TEXT NOT NULL CHECK (state IN ('WIN', 'LOSS')),
            amount INTEGER NOT NULL,
            transaction_id TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('PROCESSED', 'CANCELED'))
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_transaction_id ON events(transaction_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS balance (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            total INTEGER NOT NULL CHECK (total >= 0)
        )",
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO balance (id, total) VALUES (1, ?1)",
        params![Amount::ZERO],
    )?;

    Ok(())
}
