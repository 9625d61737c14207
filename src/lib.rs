//! Win/loss ledger.
//!
//! Records win/loss events against a single running balance that never goes
//! negative, and periodically reverses every other recent event.
//!
//! - [`amount::Amount`]: fixed-point money
//! - [`ledger::Ledger`]: `create_event` and `cancel_last_odd_events`
//! - [`storage`]: SQLite transaction scope, retry executor, balance lock
//! - [`scheduler::CancellationScheduler`]: one-shot and periodic cancellation
//! - [`api`]: HTTP boundary (`POST /event`, `GET /health`)

pub mod amount;
pub mod api;
pub mod config;
pub mod error;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod scheduler;
pub mod storage;

pub use amount::Amount;
pub use error::{LedgerError, LedgerResult};
pub use ledger::Ledger;
pub use models::{CancellationOutcome, Event, EventState, EventStatus, NewEvent};
pub use scheduler::{CancellationConfig, CancellationScheduler, OddEventCanceller, SchedulerStatus};
