//! Periodic ledger reconciliation
//!
//! Replays every customer's ledger from scratch and compares the fold
//! against the cached balance. A mismatch means the conservation law was
//! broken somewhere; the customer is halted and the divergence logged for
//! an operator.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::manager::OrderEngine;

pub struct ReconcileWorker {
    engine: OrderEngine,
    interval: Duration,
    shutdown: CancellationToken,
}

impl ReconcileWorker {
    pub fn new(engine: OrderEngine, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            engine,
            interval,
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "reconcile worker started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let engine = self.engine.clone();
                    let result = tokio::task::spawn_blocking(move || engine.reconcile_all()).await;
                    match result {
                        Ok(Ok(divergent)) if divergent.is_empty() => {
                            tracing::debug!("reconciliation clean");
                        }
                        Ok(Ok(divergent)) => {
                            tracing::error!(
                                customers = ?divergent,
                                "reconciliation found divergent ledgers"
                            );
                        }
                        Ok(Err(e)) => {
                            tracing::error!(error = %e, "reconciliation failed");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "reconciliation panicked");
                        }
                    }
                }
            }
        }
        tracing::info!("reconcile worker stopped");
    }
}
