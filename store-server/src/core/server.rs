//! Server Implementation
//!
//! HTTP server startup and lifecycle

use anyhow::Context;

use crate::core::{Config, ServerState};
use crate::engine::Storage;

/// HTTP Server
pub struct Server {
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.config.work_dir)
            .with_context(|| format!("creating work dir {}", self.config.work_dir))?;
        let storage = Storage::open(self.config.db_path()).context("opening database")?;

        let (state, notify_rx) = ServerState::initialize(&self.config, storage);
        state.start_background_tasks(notify_rx);

        let app = crate::api::router(state.clone());
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        tracing::info!("store server listening on {addr}");

        let shutdown = state.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutting down");
                shutdown.cancel();
            })
            .await
            .context("serving HTTP")?;

        Ok(())
    }
}
