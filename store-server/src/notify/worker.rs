//! Background delivery worker for operator notifications

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use super::{OperatorChannel, OrderNotification};
use crate::engine::OrderEngine;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(500);

/// Drains the engine's notification queue and mirrors each event to the
/// operator channel, retrying transient failures with backoff.
pub struct NotifyWorker {
    engine: OrderEngine,
    rx: UnboundedReceiver<OrderNotification>,
    channel: Arc<dyn OperatorChannel>,
    shutdown: CancellationToken,
}

impl NotifyWorker {
    pub fn new(
        engine: OrderEngine,
        rx: UnboundedReceiver<OrderNotification>,
        channel: Arc<dyn OperatorChannel>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            rx,
            channel,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("notify worker started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                maybe = self.rx.recv() => {
                    match maybe {
                        Some(notification) => self.deliver_with_retry(notification).await,
                        None => break,
                    }
                }
            }
        }
        tracing::info!("notify worker stopped");
    }

    async fn deliver_with_retry(&self, notification: OrderNotification) {
        let order_id = notification.order_id().to_string();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.channel.deliver(&notification).await {
                Ok(message_ref) => {
                    if notification.is_creation() {
                        if let Some(message_ref) = message_ref {
                            // Best-effort write-back; the notification was
                            // delivered either way.
                            if let Err(e) =
                                self.engine.record_message_ref(&order_id, &message_ref)
                            {
                                tracing::warn!(
                                    order_id,
                                    error = %e,
                                    "failed to record external message ref"
                                );
                            }
                        }
                    }
                    return;
                }
                Err(e) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        order_id,
                        attempt,
                        error = %e,
                        "notification delivery failed, retrying"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return,
                        _ = tokio::time::sleep(RETRY_BASE * attempt) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(
                        order_id,
                        error = %e,
                        "notification dropped after {MAX_ATTEMPTS} attempts"
                    );
                }
            }
        }
    }
}
