//! Server configuration
//!
//! # Environment variables
//!
//! Every knob can be overridden through the environment:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | WORK_DIR | /var/lib/toystore | Working directory (database, logs) |
//! | HTTP_PORT | 3000 | HTTP API port |
//! | ENVIRONMENT | development | development \| staging \| production |
//! | ACTIVATION_DELAY_DAYS | 14 | Award-to-activation grace window |
//! | RETURN_WINDOW_DAYS | 14 | Return window after delivery |
//! | ACTIVATION_SWEEP_SECS | 60 | Activation worker tick |
//! | RECONCILE_INTERVAL_SECS | 3600 | Ledger reconciliation tick |
//! | NOTIFY_WEBHOOK_URL | (unset) | Operator channel webhook; unset disables delivery |
//! | DEDUP_TIMEOUT_MS | 10000 | Request coalescer timeout |
//! | LOG_DIR | (unset) | Rolling log file directory; unset logs to stdout |
//!
//! # Example
//!
//! ```ignore
//! WORK_DIR=/data/toystore HTTP_PORT=8080 cargo run
//! ```

use std::path::PathBuf;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Working directory for the database and log files
    pub work_dir: String,
    /// HTTP API port
    pub http_port: u16,
    /// Runtime environment: development | staging | production
    pub environment: String,
    /// Days between a bonus award and its activation
    pub activation_delay_days: i64,
    /// Days after delivery during which returns are accepted
    pub return_window_days: i64,
    /// Activation sweep interval (seconds)
    pub activation_sweep_secs: u64,
    /// Reconciliation interval (seconds)
    pub reconcile_interval_secs: u64,
    /// Operator channel webhook URL; `None` disables outbound delivery
    pub notify_webhook_url: Option<String>,
    /// Request coalescer timeout (milliseconds)
    pub dedup_timeout_ms: u64,
    /// Rolling log directory; `None` logs to stdout only
    pub log_dir: Option<String>,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/toystore".into()),
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            activation_delay_days: std::env::var("ACTIVATION_DELAY_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(14),
            return_window_days: std::env::var("RETURN_WINDOW_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(14),
            activation_sweep_secs: std::env::var("ACTIVATION_SWEEP_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            reconcile_interval_secs: std::env::var("RECONCILE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
            notify_webhook_url: std::env::var("NOTIFY_WEBHOOK_URL").ok(),
            dedup_timeout_ms: std::env::var("DEDUP_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            log_dir: std::env::var("LOG_DIR").ok(),
        }
    }

    /// Path of the redb database file under the working directory
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("store.redb")
    }

    pub fn activation_delay_ms(&self) -> i64 {
        self.activation_delay_days * MILLIS_PER_DAY
    }

    pub fn return_window_ms(&self) -> i64 {
        self.return_window_days * MILLIS_PER_DAY
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
