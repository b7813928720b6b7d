//! Toy Store Server - order lifecycle and loyalty-bonus ledger engine
//!
//! # Architecture
//!
//! - **Engine** (`engine`): single-writer command engine over redb -
//!   checkout, order state machine, bonus ledger, returns, activation
//! - **Notifications** (`notify`): best-effort operator side channel
//! - **HTTP API** (`api`): RESTful interface over the engine
//!
//! # Module layout
//!
//! ```text
//! store-server/src/
//! ├── core/          # config, state, server lifecycle
//! ├── engine/        # storage, commands, workers, coalescer
//! ├── notify/        # operator notification channel
//! ├── api/           # HTTP routes and handlers
//! └── utils/         # error envelope, logging
//! ```

pub mod api;
pub mod core;
pub mod engine;
pub mod notify;
pub mod utils;

pub use crate::core::{Config, Server, ServerState};
pub use crate::utils::logger::{init_logger, init_logger_with_file};

/// Load .env and initialize logging
pub fn setup_environment() {
    dotenv::dotenv().ok();
    let config = Config::from_env();
    let level = if config.is_development() { "debug" } else { "info" };
    init_logger_with_file(level, config.is_production(), config.log_dir.as_deref());
}
