//! Process configuration, read from the environment with defaults.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scheduler::CancellationConfig;
use crate::storage::RetryPolicy;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub db_path: String,
    pub port: u16,
    pub release_mode: bool,
    pub busy_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_jitter: Duration,
    pub cancellation_enabled: bool,
    /// Used by `cancellation_task`: periodic when true, one-shot otherwise.
    pub cancellation_self_repeat: bool,
    pub cancellation: CancellationConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: default_data_path("winloss_ledger.db"),
            port: 8080,
            release_mode: false,
            busy_timeout: Duration::from_millis(5_000),
            retry_max_attempts: 10,
            retry_base_delay: Duration::from_millis(5),
            retry_jitter: Duration::from_millis(500),
            cancellation_enabled: true,
            cancellation_self_repeat: false,
            cancellation: CancellationConfig {
                batch_size: 10,
                interval: Duration::from_secs(60),
                invocation_timeout: Duration::from_secs(30),
            },
        }
    }
}

impl LedgerConfig {
    /// Load from environment with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.db_path = resolve_data_path(env::var("LEDGER_DB_PATH").ok(), "winloss_ledger.db");
        config.port = env_parse("PORT").unwrap_or(config.port);
        config.release_mode = env_flag("RELEASE_MODE").unwrap_or(config.release_mode);

        if let Some(ms) = env_parse::<u64>("DB_BUSY_TIMEOUT_MS") {
            config.busy_timeout = Duration::from_millis(ms);
        }
        config.retry_max_attempts = env_parse::<u32>("RETRY_MAX_ATTEMPTS")
            .filter(|&v| v > 0)
            .unwrap_or(config.retry_max_attempts);
        if let Some(ms) = env_parse::<u64>("RETRY_BASE_DELAY_MS") {
            config.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("RETRY_JITTER_MS") {
            config.retry_jitter = Duration::from_millis(ms);
        }

        config.cancellation_enabled =
            env_flag("CANCELLATION_ENABLED").unwrap_or(config.cancellation_enabled);
        config.cancellation_self_repeat =
            env_flag("CANCELLATION_SELF_REPEAT").unwrap_or(config.cancellation_self_repeat);
        config.cancellation.batch_size = env_parse::<usize>("CANCELLATION_BATCH_SIZE")
            .unwrap_or(config.cancellation.batch_size);
        if let Some(minutes) = env_parse::<u64>("REPEAT_CANCELLATION_EVERY").filter(|&v| v > 0) {
            config.cancellation.interval = Duration::from_secs(minutes * 60);
        }
        if let Some(secs) = env_parse::<u64>("CANCELLATION_TIMEOUT_SECS").filter(|&v| v > 0) {
            config.cancellation.invocation_timeout = Duration::from_secs(secs);
        }

        config
    }

    /// Fresh jittered policy; call once per ledger instance.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::jittered(
            self.retry_max_attempts,
            self.retry_base_delay,
            self.retry_jitter,
        )
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "on" | "ON"))
}

/// Relative paths resolve against the crate directory, not the caller's cwd.
pub fn resolve_data_path(env_value: Option<String>, default_filename: &str) -> String {
    let Some(raw) = env_value.filter(|v| !v.trim().is_empty()) else {
        return default_data_path(default_filename);
    };

    let p = PathBuf::from(raw);
    if p.is_absolute() {
        return p.to_string_lossy().to_string();
    }
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join(p)
        .to_string_lossy()
        .to_string()
}

fn default_data_path(filename: &str) -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join(filename)
        .to_string_lossy()
        .to_string()
}

/// Load `.env` from the cwd chain, then from the crate dir and its parent.
pub fn load_env() {
    let _ = dotenv::dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    for p in [manifest_dir.join(".env"), manifest_dir.join("../.env")] {
        if p.exists() {
            let _ = dotenv::from_path(&p);
        }
    }
}
