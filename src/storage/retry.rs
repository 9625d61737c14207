//! Retry executor for transient database contention.
//!
//! Not ledger-aware: callers decide what is retryable. The delay is fixed per
//! policy; `jittered` picks it at random once per policy so concurrent writers
//! don't all wake up together.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::jittered(10, Duration::from_millis(5), Duration::from_millis(500))
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Delay = `base` + uniform(0..=`jitter`), drawn once.
    pub fn jittered(max_attempts: u32, base: Duration, jitter: Duration) -> Self {
        let jitter_ms = jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        Self::fixed(max_attempts, base + Duration::from_millis(extra))
    }
}

/// Run `work` until it succeeds, fails with a non-retryable error, or attempts run out.
pub async fn retry<T, F, Fut, P>(policy: &RetryPolicy, is_retryable: P, mut work: F) -> LedgerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LedgerResult<T>>,
    P: Fn(&LedgerError) -> bool,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match work().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !is_retryable(&err) {
            return Err(err);
        }
        if attempt >= attempts {
            return Err(LedgerError::RetriesExhausted {
                attempts,
                last: Box::new(err),
            });
        }
        warn!(
            attempt,
            max_attempts = attempts,
            delay_ms = policy.delay.as_millis() as u64,
            error = %err,
            "Retrying after transient error"
        );
        sleep(policy.delay).await;
    }
}
