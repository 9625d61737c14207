//! Event ledger: the only code allowed to move the balance.
//!
//! Both mutations lock the balance row first, so check-then-write is atomic with
//! respect to every other mutation no matter how calls interleave.

use rusqlite::{params, Row, Transaction};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::amount::Amount;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{CancellationOutcome, Event, EventState, EventStatus, NewEvent};
use crate::storage::{balance, retry, with_transaction, Database, RetryPolicy, TxMode};

#[derive(Debug, Clone)]
pub struct Ledger {
    db: Database,
    retry_policy: RetryPolicy,
}

impl Ledger {
    pub fn new(db: Database, retry_policy: RetryPolicy) -> Self {
        Self { db, retry_policy }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Apply a new event to the balance, rejecting it if the balance would go negative.
    pub async fn create_event(&self, event: NewEvent) -> LedgerResult<Event> {
        event.validate()?;
        let event = Arc::new(event);

        let result = retry(&self.retry_policy, LedgerError::is_transient, || {
            let db = self.db.clone();
            let event = event.clone();
            run_blocking(move || {
                let mut conn = db.connect()?;
                with_transaction(&mut conn, TxMode::Immediate, |tx| apply_event(tx, &event))
            })
        })
        .await;

        match &result {
            Ok(stored) => debug!(
                id = stored.id,
                state = stored.state.as_str(),
                amount = %stored.amount,
                transaction_id = %stored.transaction_id,
                "Event applied"
            ),
            Err(e) if e.is_insufficient_balance() => info!(
                transaction_id = %event.transaction_id,
                amount = %event.amount,
                "Event rejected: {}", e
            ),
            Err(e) => warn!(transaction_id = %event.transaction_id, "Event failed: {}", e),
        }
        result
    }

    /// Reverse the odd-ranked, still-processed events among the latest `2n`.
    pub async fn cancel_last_odd_events(&self, n: usize) -> LedgerResult<CancellationOutcome> {
        self.cancel_with_deadline(n, None).await
    }

    /// As [`cancel_last_odd_events`](Self::cancel_last_odd_events), bounded by `timeout`.
    ///
    /// Lock waits are cut to the remaining time and the deadline is checked again
    /// right before commit, so `DeadlineExceeded` always means nothing changed.
    pub async fn cancel_last_odd_events_within(
        &self,
        n: usize,
        timeout: Duration,
    ) -> LedgerResult<CancellationOutcome> {
        self.cancel_with_deadline(n, Some(Deadline::after(timeout)))
            .await
    }

    async fn cancel_with_deadline(
        &self,
        n: usize,
        deadline: Option<Deadline>,
    ) -> LedgerResult<CancellationOutcome> {
        let outcome = retry(&self.retry_policy, LedgerError::is_transient, || {
            let db = self.db.clone();
            run_blocking(move || {
                let mut conn = match deadline {
                    Some(d) => {
                        let wait = d.remaining()?.min(db.busy_timeout());
                        db.connect_with_busy_timeout(wait)?
                    }
                    None => db.connect()?,
                };
                with_transaction(&mut conn, TxMode::Immediate, |tx| {
                    let outcome = cancel_odd_events(tx, n)?;
                    if let Some(d) = deadline {
                        d.remaining()?;
                    }
                    Ok(outcome)
                })
            })
        })
        .await?;

        info!(
            window = n * 2,
            canceled = outcome.canceled_ids.len(),
            reversal = %outcome.reversal,
            balance = %outcome.balance,
            "Cancellation pass committed"
        );
        Ok(outcome)
    }

    /// Current committed balance.
    pub async fn balance(&self) -> LedgerResult<Amount> {
        let db = self.db.clone();
        run_blocking(move || {
            let conn = db.connect()?;
            conn.query_row("SELECT total FROM balance WHERE id = 1", [], |row| {
                row.get::<_, Amount>(0)
            })
            .map_err(|e| LedgerError::from_sqlite("read balance", e))
        })
        .await
    }

    /// Σ amount over PROCESSED events; equals `balance()` at every committed state.
    pub async fn processed_total(&self) -> LedgerResult<Amount> {
        let db = self.db.clone();
        run_blocking(move || {
            let conn = db.connect()?;
            conn.query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM events WHERE status = ?1",
                params![EventStatus::Processed.as_str()],
                |row| row.get::<_, Amount>(0),
            )
            .map_err(|e| LedgerError::from_sqlite("sum processed events", e))
        })
        .await
    }

    /// All events in insertion order.
    pub async fn events(&self) -> LedgerResult<Vec<Event>> {
        let db = self.db.clone();
        run_blocking(move || {
            let conn = db.connect()?;
            let mut stmt = conn
                .prepare_cached(
                    "SELECT id, state, amount, transaction_id, status FROM events ORDER BY id ASC",
                )
                .map_err(|e| LedgerError::from_sqlite("list events", e))?;
            let events = stmt
                .query_map([], event_from_row)
                .map_err(|e| LedgerError::from_sqlite("list events", e))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| LedgerError::from_sqlite("list events", e))?;
            Ok(events)
        })
        .await
    }
}

/// Wall-clock budget for one unit of work.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    /// Time left, or `DeadlineExceeded` once it has run out.
    fn remaining(&self) -> LedgerResult<Duration> {
        let left = self.at.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(LedgerError::DeadlineExceeded(self.budget));
        }
        Ok(left)
    }
}

async fn run_blocking<T, F>(work: F) -> LedgerResult<T>
where
    F: FnOnce() -> LedgerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| LedgerError::storage("ledger worker", e))?
}

fn apply_event(tx: &Transaction<'_>, event: &NewEvent) -> LedgerResult<Event> {
    let current = balance::get_for_update(tx)?;
    let new_total = current.checked_add(event.amount).ok_or_else(|| {
        LedgerError::Validation("Amount is not valid: balance would overflow".to_string())
    })?;
    if new_total.is_negative() {
        return Err(LedgerError::InsufficientBalance {
            balance: current,
            delta: event.amount,
        });
    }

    tx.execute(
        "INSERT INTO events (state, amount, transaction_id, status) VALUES (?1, ?2, ?3, ?4)",
        params![
            event.state.as_str(),
            event.amount,
            &event.transaction_id,
            EventStatus::Processed.as_str(),
        ],
    )
    .map_err(|e| LedgerError::from_sqlite("insert event", e))?;
    let id = tx.last_insert_rowid();

    balance::set(tx, new_total)?;

    Ok(Event {
        id,
        state: event.state,
        amount: event.amount,
        transaction_id: event.transaction_id.clone(),
        status: EventStatus::Processed,
    })
}

/// One row of the cancellation window.
#[derive(Debug, Clone, PartialEq)]
struct RankedEvent {
    id: i64,
    amount: Amount,
    status: EventStatus,
    /// 1-based position in the whole history, not in the window.
    global_rank: i64,
}

fn cancel_odd_events(tx: &Transaction<'_>, n: usize) -> LedgerResult<CancellationOutcome> {
    let current = balance::get_for_update(tx)?;
    let window = fetch_ranked_window(tx, n.saturating_mul(2))?;

    let mut reversal = Amount::ZERO;
    let mut ids = Vec::new();
    for event in &window {
        if event.status == EventStatus::Canceled || event.global_rank % 2 == 0 {
            continue;
        }
        reversal = reversal
            .checked_sub(event.amount)
            .ok_or_else(|| LedgerError::Cancellation("reversal overflows".to_string()))?;
        ids.push(event.id);
    }

    let new_total = current
        .checked_add(reversal)
        .ok_or_else(|| LedgerError::Cancellation("balance overflows".to_string()))?;
    if new_total.is_negative() {
        return Err(LedgerError::InsufficientBalance {
            balance: current,
            delta: reversal,
        });
    }

    mark_canceled(tx, &ids)?;
    balance::set(tx, new_total)?;

    Ok(CancellationOutcome {
        canceled_ids: ids,
        reversal,
        balance: new_total,
    })
}

fn fetch_ranked_window(tx: &Transaction<'_>, size: usize) -> LedgerResult<Vec<RankedEvent>> {
    if size == 0 {
        return Ok(Vec::new());
    }
    let limit = i64::try_from(size).unwrap_or(i64::MAX);
    let mut stmt = tx
        .prepare_cached(
            "SELECT id, amount, status, global_rank FROM (
                SELECT id, amount, status, ROW_NUMBER() OVER (ORDER BY id ASC) AS global_rank
                FROM events
             )
             ORDER BY id DESC
             LIMIT ?1",
        )
        .map_err(|e| LedgerError::from_sqlite("fetch cancellation window", e))?;

    let rows = stmt
        .query_map(params![limit], |row| {
            Ok(RankedEvent {
                id: row.get(0)?,
                amount: row.get(1)?,
                status: status_from_row(row, 2)?,
                global_rank: row.get(3)?,
            })
        })
        .map_err(|e| LedgerError::from_sqlite("fetch cancellation window", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LedgerError::from_sqlite("fetch cancellation window", e))?;
    Ok(rows)
}

fn mark_canceled(tx: &Transaction<'_>, ids: &[i64]) -> LedgerResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let mut stmt = tx
        .prepare_cached("UPDATE events SET status = ?1 WHERE id = ?2 AND status = ?3")
        .map_err(|e| LedgerError::Cancellation(format!("prepare status update: {}", e)))?;

    let mut updated = 0usize;
    for id in ids {
        updated += stmt
            .execute(params![
                EventStatus::Canceled.as_str(),
                id,
                EventStatus::Processed.as_str()
            ])
            .map_err(|e| LedgerError::Cancellation(format!("update event {}: {}", id, e)))?;
    }
    if updated != ids.len() {
        return Err(LedgerError::Cancellation(format!(
            "expected to cancel {} events, updated {}",
            ids.len(),
            updated
        )));
    }
    Ok(())
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    let state: String = row.get(1)?;
    let state = EventState::parse(&state).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(1, "state".to_string(), rusqlite::types::Type::Text)
    })?;
    Ok(Event {
        id: row.get(0)?,
        state,
        amount: row.get(2)?,
        transaction_id: row.get(3)?,
        status: status_from_row(row, 4)?,
    })
}

fn status_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<EventStatus> {
    let status: String = row.get(idx)?;
    EventStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(idx, "status".to_string(), rusqlite::types::Type::Text)
    })
}
