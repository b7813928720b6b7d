//! Server state
//!
//! [`ServerState`] holds shared references to every long-lived component.
//! Cloning is shallow (Arc all the way down), so handlers and workers each
//! carry their own copy.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use shared::ledger::BonusBalance;

use crate::core::Config;
use crate::engine::{
    ActivationWorker, EngineConfig, OrderEngine, ReconcileWorker, RequestCoalescer, Storage,
};
use crate::notify::{NotifyWorker, NullChannel, OperatorChannel, OrderNotification, WebhookChannel};

#[derive(Clone)]
pub struct ServerState {
    /// Server configuration
    pub config: Config,
    /// The order and ledger engine
    pub engine: OrderEngine,
    /// Coalescer for read-heavy balance lookups
    pub balance_reads: Arc<RequestCoalescer<BonusBalance>>,
    /// Cancels every background worker on shutdown
    pub shutdown: CancellationToken,
}

impl ServerState {
    /// Build the full state from configuration.
    ///
    /// Returns the notification receiver alongside the state; the caller
    /// hands it to [`ServerState::start_background_tasks`].
    pub fn initialize(
        config: &Config,
        storage: Storage,
    ) -> (Self, mpsc::UnboundedReceiver<OrderNotification>) {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let engine = OrderEngine::new(
            storage,
            EngineConfig {
                activation_delay_ms: config.activation_delay_ms(),
                return_window_ms: config.return_window_ms(),
            },
        )
        .with_notifications(notify_tx);

        let state = Self {
            config: config.clone(),
            engine,
            balance_reads: Arc::new(RequestCoalescer::new(Duration::from_millis(
                config.dedup_timeout_ms,
            ))),
            shutdown: CancellationToken::new(),
        };
        (state, notify_rx)
    }

    /// Spawn the activation, reconciliation, and notification workers
    pub fn start_background_tasks(&self, notify_rx: mpsc::UnboundedReceiver<OrderNotification>) {
        let activation = ActivationWorker::new(
            self.engine.clone(),
            Duration::from_secs(self.config.activation_sweep_secs),
            self.shutdown.clone(),
        );
        tokio::spawn(activation.run());

        let reconcile = ReconcileWorker::new(
            self.engine.clone(),
            Duration::from_secs(self.config.reconcile_interval_secs),
            self.shutdown.clone(),
        );
        tokio::spawn(reconcile.run());

        let channel: Arc<dyn OperatorChannel> = match &self.config.notify_webhook_url {
            Some(url) => Arc::new(WebhookChannel::new(url.clone())),
            None => Arc::new(NullChannel),
        };
        let notify = NotifyWorker::new(
            self.engine.clone(),
            notify_rx,
            channel,
            self.shutdown.clone(),
        );
        tokio::spawn(notify.run());
    }
}
