//! Ledger data model: events and their lifecycle states.

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::error::{LedgerError, LedgerResult};

/// Outcome an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventState {
    Win,
    Loss,
}

impl EventState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventState::Win => "WIN",
            EventState::Loss => "LOSS",
        }
    }

    /// Case-insensitive parse of `win` / `loss`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WIN" => Some(EventState::Win),
            "LOSS" => Some(EventState::Loss),
            _ => None,
        }
    }
}

/// Processing status. Moves PROCESSED -> CANCELED once and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventStatus {
    Processed,
    Canceled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Processed => "PROCESSED",
            EventStatus::Canceled => "CANCELED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROCESSED" => Some(EventStatus::Processed),
            "CANCELED" => Some(EventStatus::Canceled),
            _ => None,
        }
    }
}

/// An event as submitted, before storage assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub state: EventState,
    pub amount: Amount,
    pub transaction_id: String,
}

impl NewEvent {
    pub fn new(state: EventState, amount: Amount, transaction_id: impl Into<String>) -> Self {
        Self {
            state,
            amount,
            transaction_id: transaction_id.into(),
        }
    }

    /// WIN must carry a non-negative amount, LOSS a non-positive one.
    pub fn validate(&self) -> LedgerResult<()> {
        match self.state {
            EventState::Win if self.amount.is_negative() => Err(LedgerError::Validation(
                "Amount is not valid: WIN amount must not be negative".to_string(),
            )),
            EventState::Loss if self.amount.is_positive() => Err(LedgerError::Validation(
                "Amount is not valid: LOSS amount must not be positive".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// A persisted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub state: EventState,
    pub amount: Amount,
    pub transaction_id: String,
    pub status: EventStatus,
}

/// Result of one CancelLastOddEvents run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CancellationOutcome {
    pub canceled_ids: Vec<i64>,
    /// Sum applied to the balance (the negated amounts of canceled events).
    pub reversal: Amount,
    pub balance: Amount,
}
