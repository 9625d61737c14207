//! Cancellation Task
//!
//! Runs the odd-event cancellation pass against the ledger database, either
//! once (default) or every N minutes until interrupted.
//!
//! Usage:
//!   cancellation_task --batch-size 10
//!   cancellation_task --self-repeat --every-minutes 5

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use winloss_ledger::{
    config::{load_env, resolve_data_path, LedgerConfig},
    storage::Database,
    CancellationScheduler, Ledger,
};

/// Flags override the environment settings read by `LedgerConfig::from_env`.
#[derive(Parser, Debug, Default)]
#[command(name = "cancellation_task")]
#[command(about = "Cancel every other recent win/loss event")]
struct Args {
    /// SQLite database path [default: LEDGER_DB_PATH]
    #[arg(long)]
    db_path: Option<String>,

    /// Events considered per pass is twice this [default: CANCELLATION_BATCH_SIZE]
    #[arg(long)]
    batch_size: Option<usize>,

    /// Keep running and repeat on an interval [default: CANCELLATION_SELF_REPEAT]
    #[arg(long)]
    self_repeat: bool,

    /// Interval between passes in minutes [default: REPEAT_CANCELLATION_EVERY]
    #[arg(long)]
    every_minutes: Option<u64>,

    /// Deadline for a single pass in seconds [default: CANCELLATION_TIMEOUT_SECS]
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl Args {
    fn apply(&self, mut config: LedgerConfig) -> LedgerConfig {
        if let Some(path) = &self.db_path {
            config.db_path = resolve_data_path(Some(path.clone()), "winloss_ledger.db");
        }
        if let Some(batch_size) = self.batch_size {
            config.cancellation.batch_size = batch_size;
        }
        config.cancellation_self_repeat |= self.self_repeat;
        if let Some(minutes) = self.every_minutes.filter(|&m| m > 0) {
            config.cancellation.interval = Duration::from_secs(minutes * 60);
        }
        if let Some(secs) = self.timeout_secs.filter(|&s| s > 0) {
            config.cancellation.invocation_timeout = Duration::from_secs(secs);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("cancellation_task=debug".parse()?),
        )
        .init();

    let config = Args::parse().apply(LedgerConfig::from_env());

    info!("Starting cancellation task");
    info!("  Database: {}", config.db_path);
    info!("  Batch size: {}", config.cancellation.batch_size);
    info!("  Self repeat: {}", config.cancellation_self_repeat);

    let db = Database::open(&config.db_path, config.busy_timeout)?;
    let ledger = Arc::new(Ledger::new(db, config.retry_policy()));
    let scheduler = CancellationScheduler::new(ledger, config.cancellation.clone());

    if !config.cancellation_self_repeat {
        let outcome = scheduler
            .run_once()
            .await
            .context("cancellation pass failed")?;
        info!(
            "Canceled {} events, balance now {}",
            outcome.canceled_ids.len(),
            outcome.balance
        );
        return Ok(());
    }

    info!("  Every: {:?}", config.cancellation.interval);
    scheduler.start_periodic();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
    scheduler.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flags_keeps_environment_settings() {
        let base = LedgerConfig {
            cancellation_self_repeat: true,
            ..LedgerConfig::default()
        };
        let config = Args::default().apply(base.clone());
        assert_eq!(config.db_path, base.db_path);
        assert_eq!(config.cancellation, base.cancellation);
        assert!(config.cancellation_self_repeat);
    }

    #[test]
    fn test_flags_override_environment_settings() {
        let args = Args::parse_from([
            "cancellation_task",
            "--db-path",
            "/tmp/other.db",
            "--batch-size",
            "3",
            "--self-repeat",
            "--every-minutes",
            "5",
            "--timeout-secs",
            "7",
        ]);
        let config = args.apply(LedgerConfig::default());
        assert_eq!(config.db_path, "/tmp/other.db");
        assert_eq!(config.cancellation.batch_size, 3);
        assert!(config.cancellation_self_repeat);
        assert_eq!(config.cancellation.interval, Duration::from_secs(300));
        assert_eq!(config.cancellation.invocation_timeout, Duration::from_secs(7));
    }
}
