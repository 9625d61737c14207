//! Cancellation scheduler.
//!
//! Drives `cancel_last_odd_events` either once or on a fixed interval. One
//! scheduler owns at most one periodic task; the task stops through its handle
//! rather than running until the process dies.
//!
//! The invocation deadline is handed to the canceller and enforced inside its
//! unit of work. The scheduler never abandons a pass that is still running.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::LedgerResult;
use crate::ledger::Ledger;
use crate::models::CancellationOutcome;

#[async_trait::async_trait]
pub trait OddEventCanceller: Send + Sync {
    /// Cancel within `timeout`. On `DeadlineExceeded` nothing may have been committed.
    async fn cancel_last_odd_events_within(
        &self,
        n: usize,
        timeout: Duration,
    ) -> LedgerResult<CancellationOutcome>;
}

#[async_trait::async_trait]
impl OddEventCanceller for Ledger {
    async fn cancel_last_odd_events_within(
        &self,
        n: usize,
        timeout: Duration,
    ) -> LedgerResult<CancellationOutcome> {
        Ledger::cancel_last_odd_events_within(self, n, timeout).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationConfig {
    /// `n` passed to every invocation (the window is `2n`).
    pub batch_size: usize,
    pub interval: Duration,
    /// Upper bound on a single invocation.
    pub invocation_timeout: Duration,
}

impl Default for CancellationConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            interval: Duration::from_secs(60),
            invocation_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerStatus {
    Idle,
    Scheduled,
    Running { tick: u64 },
}

struct ActiveSchedule {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct CancellationScheduler {
    canceller: Arc<dyn OddEventCanceller>,
    config: CancellationConfig,
    status: Arc<Mutex<SchedulerStatus>>,
    active: Mutex<Option<ActiveSchedule>>,
}

impl CancellationScheduler {
    pub fn new(canceller: Arc<dyn OddEventCanceller>, config: CancellationConfig) -> Self {
        Self {
            canceller,
            config,
            status: Arc::new(Mutex::new(SchedulerStatus::Idle)),
            active: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CancellationConfig {
        &self.config
    }

    pub fn status(&self) -> SchedulerStatus {
        *self.status.lock()
    }

    /// Spawn the periodic task. Returns `false` (and does nothing) if one is active.
    pub fn start_periodic(&self) -> bool {
        let mut active = self.active.lock();
        if active.is_some() {
            debug!("Cancellation already scheduled; ignoring start");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.status.lock() = SchedulerStatus::Scheduled;
        let handle = tokio::spawn(run_periodic(
            self.canceller.clone(),
            self.config.clone(),
            self.status.clone(),
            shutdown_rx,
        ));
        *active = Some(ActiveSchedule {
            shutdown: shutdown_tx,
            handle,
        });

        info!(
            batch_size = self.config.batch_size,
            interval_secs = self.config.interval.as_secs_f64(),
            "🧹 Cancellation scheduled"
        );
        true
    }

    /// Invoke cancellation once and hand the result back.
    pub async fn run_once(&self) -> LedgerResult<CancellationOutcome> {
        invoke(self.canceller.as_ref(), &self.config).await
    }

    /// Stop the periodic task, letting an in-flight tick finish.
    pub async fn stop(&self) {
        let active = self.active.lock().take();
        if let Some(active) = active {
            let _ = active.shutdown.send(true);
            if let Err(e) = active.handle.await {
                warn!("Cancellation task ended abnormally: {}", e);
            }
            info!("Cancellation schedule stopped");
        }
        *self.status.lock() = SchedulerStatus::Idle;
    }
}

async fn invoke(
    canceller: &dyn OddEventCanceller,
    config: &CancellationConfig,
) -> LedgerResult<CancellationOutcome> {
    canceller
        .cancel_last_odd_events_within(config.batch_size, config.invocation_timeout)
        .await
}

async fn run_periodic(
    canceller: Arc<dyn OddEventCanceller>,
    config: CancellationConfig,
    status: Arc<Mutex<SchedulerStatus>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = config.interval.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        tick += 1;
        *status.lock() = SchedulerStatus::Running { tick };
        match invoke(canceller.as_ref(), &config).await {
            Ok(outcome) => debug!(
                tick,
                canceled = outcome.canceled_ids.len(),
                balance = %outcome.balance,
                "Cancellation tick done"
            ),
            Err(e) => error!(tick, "Cancellation tick failed: {}", e),
        }
        *status.lock() = SchedulerStatus::Scheduled;

        if *shutdown.borrow() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::error::LedgerError;
    use crate::models::{EventState, EventStatus, NewEvent};
    use crate::storage::{Database, RetryPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::NamedTempFile;
    use tokio::sync::Notify;

    /// Fails every other call, counting invocations.
    #[derive(Default)]
    struct FlakyCanceller {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl OddEventCanceller for FlakyCanceller {
        async fn cancel_last_odd_events_within(
            &self,
            n: usize,
            _timeout: Duration,
        ) -> LedgerResult<CancellationOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call % 2 == 1 {
                return Err(LedgerError::Cancellation(format!("call {call} failed")));
            }
            Ok(CancellationOutcome {
                canceled_ids: (0..n as i64).collect(),
                reversal: Amount::ZERO,
                balance: Amount::ZERO,
            })
        }
    }

    /// Parks inside the call until released.
    #[derive(Default)]
    struct GatedCanceller {
        entered: Notify,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl OddEventCanceller for GatedCanceller {
        async fn cancel_last_odd_events_within(
            &self,
            _n: usize,
            _timeout: Duration,
        ) -> LedgerResult<CancellationOutcome> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(CancellationOutcome::default())
        }
    }

    fn fast_config() -> CancellationConfig {
        CancellationConfig {
            batch_size: 3,
            interval: Duration::from_millis(10),
            invocation_timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn test_periodic_keeps_running_after_errors() {
        let canceller = Arc::new(FlakyCanceller::default());
        let scheduler = CancellationScheduler::new(canceller.clone(), fast_config());

        assert!(scheduler.start_periodic());
        for _ in 0..200 {
            if canceller.calls.load(Ordering::SeqCst) >= 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        scheduler.stop().await;

        assert!(canceller.calls.load(Ordering::SeqCst) >= 4);
        assert_eq!(scheduler.status(), SchedulerStatus::Idle);
    }

    #[tokio::test]
    async fn test_second_start_is_a_no_op() {
        let canceller = Arc::new(FlakyCanceller::default());
        let scheduler = CancellationScheduler::new(canceller, fast_config());

        assert_eq!(scheduler.status(), SchedulerStatus::Idle);
        assert!(scheduler.start_periodic());
        assert!(!scheduler.start_periodic());
        assert_ne!(scheduler.status(), SchedulerStatus::Idle);

        scheduler.stop().await;
        assert_eq!(scheduler.status(), SchedulerStatus::Idle);

        // A stopped scheduler can be started again.
        assert!(scheduler.start_periodic());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_status_reports_running_tick() {
        let canceller = Arc::new(GatedCanceller::default());
        let scheduler = CancellationScheduler::new(canceller.clone(), fast_config());

        assert!(scheduler.start_periodic());
        canceller.entered.notified().await;
        assert_eq!(scheduler.status(), SchedulerStatus::Running { tick: 1 });

        canceller.release.notify_one();
        scheduler.stop().await;
        assert_eq!(scheduler.status(), SchedulerStatus::Idle);
    }

    #[tokio::test]
    async fn test_run_once_returns_error_to_caller() {
        let canceller = Arc::new(FlakyCanceller::default());
        let scheduler = CancellationScheduler::new(canceller.clone(), fast_config());

        let err = scheduler.run_once().await.unwrap_err();
        assert!(matches!(err, LedgerError::Cancellation(_)));

        let outcome = scheduler.run_once().await.unwrap();
        assert_eq!(outcome.canceled_ids.len(), 3);
        assert_eq!(canceller.calls.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.status(), SchedulerStatus::Idle);
    }

    #[tokio::test]
    async fn test_missed_deadline_commits_nothing() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::open(temp.path().to_str().unwrap(), Duration::from_secs(5)).unwrap();
        let ledger = Arc::new(Ledger::new(
            db.clone(),
            RetryPolicy::fixed(10, Duration::from_millis(5)),
        ));
        for i in 1..=4 {
            ledger
                .create_event(NewEvent::new(
                    EventState::Win,
                    Amount::from_units(i).unwrap(),
                    format!("tx-{i}"),
                ))
                .await
                .unwrap();
        }

        // Another writer keeps the database locked well past the deadline.
        let holder = db.connect().unwrap();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let handle = std::thread::spawn(move || {
            holder.execute_batch("BEGIN IMMEDIATE").unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(300));
            holder.execute_batch("COMMIT").unwrap();
        });
        locked_rx.recv().unwrap();

        let scheduler = CancellationScheduler::new(
            ledger.clone(),
            CancellationConfig {
                batch_size: 2,
                interval: Duration::from_secs(60),
                invocation_timeout: Duration::from_millis(50),
            },
        );
        let err = scheduler.run_once().await.unwrap_err();
        assert!(matches!(err, LedgerError::DeadlineExceeded(_)), "got {err}");

        handle.join().unwrap();
        assert_eq!(ledger.balance().await.unwrap(), Amount::from_units(10).unwrap());
        assert!(ledger
            .events()
            .await
            .unwrap()
            .iter()
            .all(|e| e.status == EventStatus::Processed));
    }
}
