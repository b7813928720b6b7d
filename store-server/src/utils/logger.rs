//! Logging Infrastructure
//!
//! Structured logging setup with support for both development and production environments.

use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize the logger with defaults (info level, human-readable, stdout)
pub fn init_logger() {
    init_logger_with_file("info", false, None);
}

/// Initialize the logger.
///
/// `RUST_LOG` overrides `default_level` when set. With `json` the output
/// switches to JSON lines for log shipping. When `log_dir` names an
/// existing directory, output goes to a daily-rolling file instead of
/// stdout.
pub fn init_logger_with_file(default_level: &str, json: bool, log_dir: Option<&str>) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(false);

    // Add file output if log_dir is provided
    if let Some(dir) = log_dir {
        if Path::new(dir).exists() {
            let file_appender = tracing_appender::rolling::daily(dir, "store-server");
            if json {
                subscriber.json().with_writer(file_appender).init();
            } else {
                subscriber.with_writer(file_appender).init();
            }
            return;
        }
    }

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
