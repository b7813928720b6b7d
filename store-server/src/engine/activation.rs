//! Periodic activation sweep
//!
//! Converts due pending awards into active points. Each award is handled in
//! its own transaction, so one bad customer cannot wedge the sweep.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::manager::OrderEngine;

pub struct ActivationWorker {
    engine: OrderEngine,
    interval: Duration,
    shutdown: CancellationToken,
}

impl ActivationWorker {
    pub fn new(engine: OrderEngine, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            engine,
            interval,
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "activation worker started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    // The sweep is sync (redb), so keep it off the runtime
                    // worker threads.
                    let engine = self.engine.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        engine.run_activation_sweep()
                    })
                    .await;
                    match result {
                        Ok(Ok(0)) => {}
                        Ok(Ok(activated)) => {
                            tracing::info!(activated, "activation sweep completed");
                        }
                        Ok(Err(e)) => {
                            tracing::error!(error = %e, "activation sweep failed");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "activation sweep panicked");
                        }
                    }
                }
            }
        }
        tracing::info!("activation worker stopped");
    }
}
