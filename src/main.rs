//! Win/loss ledger server.
//!
//! Accepts events over HTTP and, when enabled, runs the periodic cancellation
//! pass in the background of the same process.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use winloss_ledger::{
    api::create_router,
    config::{load_env, LedgerConfig},
    storage::Database,
    CancellationScheduler, Ledger,
};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    let config = LedgerConfig::from_env();
    init_tracing(config.release_mode);

    info!("🚀 Win/loss ledger starting");

    let db = Database::open(&config.db_path, config.busy_timeout)?;
    let ledger = Arc::new(Ledger::new(db, config.retry_policy()));
    info!("💾 Database initialized at: {}", config.db_path);

    let scheduler = Arc::new(CancellationScheduler::new(
        ledger.clone(),
        config.cancellation.clone(),
    ));
    if config.cancellation_enabled {
        scheduler.start_periodic();
    } else {
        info!("🧹 Periodic cancellation disabled");
    }

    let app = create_router(ledger);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {}", addr))?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    scheduler.stop().await;
    info!("👋 Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("Shutdown signal received");
}

fn init_tracing(release_mode: bool) {
    let default_filter = if release_mode {
        "winloss_ledger=info,tower_http=info"
    } else {
        "winloss_ledger=debug,tower_http=debug"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
