//! Order engine
//!
//! [`OrderEngine`] is the single entry point for every order and ledger
//! mutation. Commands share one pipeline:
//!
//! 1. idempotency pre-check outside the transaction (cheap replay path)
//! 2. begin the write transaction (redb is single-writer, so commands
//!    serialize here)
//! 3. re-check idempotency inside the transaction
//! 4. validate and mutate
//! 5. store the outcome under the command key
//! 6. commit, then emit the notification
//!
//! A replayed command returns its original outcome byte-for-byte; it never
//! re-runs side effects.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shared::ledger::{BonusBalance, LedgerEntry, LedgerEntryKind};
use shared::now_millis;
use shared::order::{Order, OrderReturn};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use super::checkout::{apply_checkout, CheckoutOutcome, CheckoutRequest};
use super::error::{EngineError, EngineResult};
use super::ledger::{
    append_entry, reversed_pending_for_order, verify_customer_txn, EntryParams,
};
use super::returns::{apply_return, ReturnOutcome, ReturnRequest};
use super::storage::{DueActivation, Product, Storage, StorageError};
use super::transition::{apply_transition, TransitionOutcome, TransitionRequest};
use crate::notify::OrderNotification;

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay between award and activation (the returns grace window)
    pub activation_delay_ms: i64,
    /// How long after delivery a return is accepted
    pub return_window_ms: i64,
}

/// Serialized command outcome, stored for idempotent replay
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "command", content = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
enum StoredOutcome {
    Checkout(CheckoutOutcome),
    Transition(TransitionOutcome),
    Return(ReturnOutcome),
}

/// The order and ledger engine
#[derive(Clone)]
pub struct OrderEngine {
    storage: Storage,
    config: EngineConfig,
    notify_tx: Option<UnboundedSender<OrderNotification>>,
    /// Customers whose ledger failed an integrity check; their activations
    /// are frozen until an operator intervenes.
    halted: Arc<RwLock<HashSet<String>>>,
}

impl OrderEngine {
    pub fn new(storage: Storage, config: EngineConfig) -> Self {
        Self {
            storage,
            config,
            notify_tx: None,
            halted: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Attach the notification side channel
    pub fn with_notifications(mut self, tx: UnboundedSender<OrderNotification>) -> Self {
        self.notify_tx = Some(tx);
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    // ========== Commands ==========

    /// Checkout: turn a cart into an order, atomically with its stock
    /// decrement and ledger entries.
    pub fn checkout(&self, request: &CheckoutRequest) -> EngineResult<CheckoutOutcome> {
        let key = format!("checkout/{}", request.idempotency_key);
        if let Some(bytes) = self.storage.get_processed(&key)? {
            return replay_checkout(&bytes);
        }
        if let Some(customer_id) = request.customer_id.as_deref() {
            self.ensure_not_halted(customer_id)?;
        }

        let txn = self.storage.begin_write()?;
        if let Some(bytes) = self.storage.get_processed_txn(&txn, &key)? {
            return replay_checkout(&bytes);
        }
        let (order, activation_due_at) =
            apply_checkout(&self.storage, &txn, request, self.config.activation_delay_ms)?;
        let outcome = CheckoutOutcome::from_order(&order, activation_due_at);
        self.storage
            .mark_processed_txn(&txn, &key, &encode(&StoredOutcome::Checkout(outcome.clone()))?)?;
        txn.commit().map_err(StorageError::from)?;

        tracing::info!(
            order_id = %outcome.order_id,
            final_amount = %outcome.final_amount,
            bonuses_awarded = outcome.bonuses_awarded,
            "order created"
        );
        self.notify(OrderNotification::OrderCreated {
            order_id: outcome.order_id.clone(),
            customer_id: order.customer_id.clone(),
            final_amount: outcome.final_amount,
            bonuses_awarded: outcome.bonuses_awarded,
        });
        Ok(outcome)
    }

    /// Move an order along the state machine
    pub fn transition(
        &self,
        order_id: &str,
        request: &TransitionRequest,
    ) -> EngineResult<TransitionOutcome> {
        let key = format!(
            "transition/{}/{}/{}",
            order_id, request.target, request.idempotency_key
        );
        if let Some(bytes) = self.storage.get_processed(&key)? {
            return replay_transition(&bytes);
        }

        let txn = self.storage.begin_write()?;
        if let Some(bytes) = self.storage.get_processed_txn(&txn, &key)? {
            return replay_transition(&bytes);
        }
        let (order, outcome) = apply_transition(&self.storage, &txn, order_id, request)?;
        self.storage.mark_processed_txn(
            &txn,
            &key,
            &encode(&StoredOutcome::Transition(outcome.clone()))?,
        )?;
        txn.commit().map_err(StorageError::from)?;

        if outcome.from != outcome.to {
            tracing::info!(
                order_id,
                from = %outcome.from,
                to = %outcome.to,
                actor = %request.actor.describe(),
                "order transitioned"
            );
            self.notify(OrderNotification::OrderTransitioned {
                order_id: order.order_id,
                from: outcome.from,
                to: outcome.to,
            });
        }
        Ok(outcome)
    }

    /// Process a (possibly partial) return against a delivered order
    pub fn process_return(
        &self,
        order_id: &str,
        request: &ReturnRequest,
    ) -> EngineResult<ReturnOutcome> {
        let key = format!("return/{}/{}", order_id, request.idempotency_key);
        if let Some(bytes) = self.storage.get_processed(&key)? {
            return replay_return(&bytes);
        }

        let txn = self.storage.begin_write()?;
        if let Some(bytes) = self.storage.get_processed_txn(&txn, &key)? {
            return replay_return(&bytes);
        }
        let record = apply_return(
            &self.storage,
            &txn,
            order_id,
            request,
            self.config.return_window_ms,
        )?;
        let outcome = ReturnOutcome {
            return_id: record.return_id.clone(),
            order_id: record.order_id.clone(),
            refund_amount: record.refund_amount,
            bonus_reversal_amount: record.bonus_reversal_amount,
        };
        self.storage
            .mark_processed_txn(&txn, &key, &encode(&StoredOutcome::Return(outcome.clone()))?)?;
        txn.commit().map_err(StorageError::from)?;

        tracing::info!(
            order_id,
            return_id = %outcome.return_id,
            refund = %outcome.refund_amount,
            "return processed"
        );
        self.notify(OrderNotification::ReturnProcessed {
            order_id: outcome.order_id.clone(),
            return_id: outcome.return_id.clone(),
            refund_amount: outcome.refund_amount,
        });
        Ok(outcome)
    }

    // ========== Activation ==========

    /// Activate every due pending award. Returns the number of awards
    /// activated.
    pub fn run_activation_sweep(&self) -> EngineResult<usize> {
        let due = self.storage.due_activations(now_millis())?;
        let mut activated = 0;
        for row in due {
            if self.is_halted(&row.customer_id) {
                continue;
            }
            match self.activate_one(&row) {
                Ok(true) => activated += 1,
                Ok(false) => {}
                Err(EngineError::LedgerDivergence { .. }) => {
                    tracing::error!(
                        customer_id = %row.customer_id,
                        "ledger divergence detected, halting customer activations"
                    );
                    self.halt(&row.customer_id);
                }
                Err(e) => {
                    tracing::error!(
                        customer_id = %row.customer_id,
                        seq = row.seq,
                        error = %e,
                        "activation failed"
                    );
                }
            }
        }
        Ok(activated)
    }

    /// Activate one queued award; `Ok(false)` when another actor already
    /// handled it (voided, fully returned, or a racing sweep).
    fn activate_one(&self, row: &DueActivation) -> EngineResult<bool> {
        let txn = self.storage.begin_write()?;
        // The dequeue doubles as the idempotency check: a row can only be
        // taken once.
        if !self
            .storage
            .dequeue_activation_txn(&txn, &row.customer_id, row.seq)?
        {
            return Ok(false);
        }
        let Some(entry) = self
            .storage
            .get_ledger_entry_txn(&txn, &row.customer_id, row.seq)?
        else {
            // Orphan queue row; keep the dequeue.
            txn.commit().map_err(StorageError::from)?;
            return Ok(false);
        };
        if entry.kind != LedgerEntryKind::AwardPending {
            txn.commit().map_err(StorageError::from)?;
            return Ok(false);
        }

        verify_customer_txn(&self.storage, &txn, &row.customer_id)?;

        // Returns may have clawed back part of the award while it waited.
        let entries = self.storage.ledger_entries_txn(&txn, &row.customer_id)?;
        let remaining = match entry.order_id.as_deref() {
            Some(order_id) => entry.amount - reversed_pending_for_order(&entries, order_id),
            None => entry.amount,
        };
        if remaining <= 0 {
            txn.commit().map_err(StorageError::from)?;
            return Ok(false);
        }

        append_entry(
            &self.storage,
            &txn,
            EntryParams {
                customer_id: &row.customer_id,
                order_id: entry.order_id.as_deref(),
                kind: LedgerEntryKind::AwardActivated,
                amount: remaining,
                active_delta: remaining,
                pending_delta: -remaining,
                activation_due_at: None,
                note: None,
            },
        )?;
        txn.commit().map_err(StorageError::from)?;
        tracing::info!(
            customer_id = %row.customer_id,
            points = remaining,
            "pending award activated"
        );
        Ok(true)
    }

    // ========== Integrity ==========

    /// Replay every customer's ledger against the cached balance. Divergent
    /// customers are halted and returned.
    pub fn reconcile_all(&self) -> EngineResult<Vec<String>> {
        let mut divergent = Vec::new();
        for customer_id in self.storage.customers_with_balances()? {
            match super::ledger::verify_customer(&self.storage, &customer_id) {
                Ok(_) => {}
                Err(EngineError::LedgerDivergence {
                    cached_active,
                    cached_pending,
                    folded_active,
                    folded_pending,
                    ..
                }) => {
                    tracing::error!(
                        customer_id = %customer_id,
                        cached_active,
                        cached_pending,
                        folded_active,
                        folded_pending,
                        "ledger divergence, halting customer"
                    );
                    self.halt(&customer_id);
                    divergent.push(customer_id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(divergent)
    }

    pub fn is_halted(&self, customer_id: &str) -> bool {
        self.halted.read().contains(customer_id)
    }

    pub fn halted_customers(&self) -> Vec<String> {
        self.halted.read().iter().cloned().collect()
    }

    fn halt(&self, customer_id: &str) {
        self.halted.write().insert(customer_id.to_string());
    }

    fn ensure_not_halted(&self, customer_id: &str) -> EngineResult<()> {
        if self.is_halted(customer_id) {
            return Err(EngineError::InvalidOperation(format!(
                "customer {customer_id} is halted pending ledger reconciliation"
            )));
        }
        Ok(())
    }

    // ========== Queries ==========

    pub fn get_order(&self, order_id: &str) -> EngineResult<Order> {
        self.storage
            .get_order(order_id)?
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))
    }

    pub fn order_returns(&self, order_id: &str) -> EngineResult<Vec<OrderReturn>> {
        // Surface a 404 for unknown orders rather than an empty list.
        self.get_order(order_id)?;
        Ok(self.storage.returns_for_order(order_id)?)
    }

    pub fn ledger_page(
        &self,
        customer_id: &str,
        before_seq: Option<u64>,
        limit: usize,
    ) -> EngineResult<Vec<LedgerEntry>> {
        Ok(self.storage.ledger_page(customer_id, before_seq, limit)?)
    }

    pub fn balance(&self, customer_id: &str) -> EngineResult<BonusBalance> {
        Ok(self.storage.get_balance(customer_id)?)
    }

    // ========== Catalog ==========

    pub fn upsert_product(&self, product: &Product, stock: u32) -> EngineResult<()> {
        self.storage.upsert_product(product, stock)?;
        tracing::info!(product_id = %product.product_id, stock, "product upserted");
        Ok(())
    }

    pub fn get_product(&self, product_id: &str) -> EngineResult<(Product, u32)> {
        let product = self
            .storage
            .get_product(product_id)?
            .ok_or_else(|| EngineError::ProductNotFound(product_id.to_string()))?;
        let stock = self.storage.get_stock(product_id)?;
        Ok((product, stock))
    }

    // ========== Side channel ==========

    /// Record the operator channel's handle for an order's mirrored message
    pub fn record_message_ref(&self, order_id: &str, message_ref: &str) -> EngineResult<()> {
        let txn = self.storage.begin_write()?;
        let mut order = self
            .storage
            .get_order_txn(&txn, order_id)?
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;
        order.external_message_ref = Some(message_ref.to_string());
        self.storage.store_order(&txn, &order)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn notify(&self, notification: OrderNotification) {
        if let Some(tx) = &self.notify_tx {
            if tx.send(notification).is_err() {
                tracing::warn!("notification channel closed, event dropped");
            }
        }
    }
}

fn encode(outcome: &StoredOutcome) -> EngineResult<Vec<u8>> {
    Ok(serde_json::to_vec(outcome).map_err(StorageError::from)?)
}

fn decode(bytes: &[u8]) -> EngineResult<StoredOutcome> {
    Ok(serde_json::from_slice(bytes).map_err(StorageError::from)?)
}

fn replay_checkout(bytes: &[u8]) -> EngineResult<CheckoutOutcome> {
    match decode(bytes)? {
        StoredOutcome::Checkout(outcome) => Ok(outcome),
        _ => Err(EngineError::InvalidOperation(
            "idempotency key was used by a different command".to_string(),
        )),
    }
}

fn replay_transition(bytes: &[u8]) -> EngineResult<TransitionOutcome> {
    match decode(bytes)? {
        StoredOutcome::Transition(outcome) => Ok(outcome),
        _ => Err(EngineError::InvalidOperation(
            "idempotency key was used by a different command".to_string(),
        )),
    }
}

fn replay_return(bytes: &[u8]) -> EngineResult<ReturnOutcome> {
    match decode(bytes)? {
        StoredOutcome::Return(outcome) => Ok(outcome),
        _ => Err(EngineError::InvalidOperation(
            "idempotency key was used by a different command".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::checkout::CartLine;
    use rust_decimal::Decimal;
    use shared::order::{Actor, DeliveryMethod, OrderStatus, PaymentMethod, ReturnItem};

    fn engine() -> OrderEngine {
        let storage = Storage::open_in_memory().unwrap();
        let engine = OrderEngine::new(
            storage,
            EngineConfig {
                activation_delay_ms: 0, // immediately due, for sweep tests
                return_window_ms: 60_000,
            },
        );
        engine
            .upsert_product(
                &Product {
                    product_id: "bear".to_string(),
                    name: "Plush Bear".to_string(),
                    price: Decimal::new(2000, 2),
                    bonus_award_rate: 5,
                },
                10,
            )
            .unwrap();
        engine
    }

    fn checkout_request(key: &str) -> CheckoutRequest {
        CheckoutRequest {
            idempotency_key: key.to_string(),
            items: vec![CartLine {
                product_id: "bear".to_string(),
                quantity: 1,
            }],
            delivery_method: DeliveryMethod::Courier,
            payment_method: PaymentMethod::Card,
            bonuses_to_spend: 0,
            customer_id: Some("alice".to_string()),
            guest_contact: None,
            assigned_operator: None,
        }
    }

    #[test]
    fn checkout_replay_returns_original_outcome_without_side_effects() {
        let engine = engine();
        let first = engine.checkout(&checkout_request("k1")).unwrap();
        let second = engine.checkout(&checkout_request("k1")).unwrap();

        assert_eq!(first, second);
        // Stock decremented exactly once.
        assert_eq!(engine.storage().get_stock("bear").unwrap(), 9);
        // One pending award, not two.
        assert_eq!(engine.balance("alice").unwrap().pending, 5);
    }

    #[test]
    fn distinct_keys_create_distinct_orders() {
        let engine = engine();
        let a = engine.checkout(&checkout_request("k1")).unwrap();
        let b = engine.checkout(&checkout_request("k2")).unwrap();
        assert_ne!(a.order_id, b.order_id);
        assert_eq!(engine.storage().get_stock("bear").unwrap(), 8);
    }

    #[test]
    fn transition_replay_is_idempotent() {
        let engine = engine();
        let order = engine.checkout(&checkout_request("k1")).unwrap();
        let req = TransitionRequest {
            idempotency_key: "t1".to_string(),
            target: OrderStatus::Confirmed,
            expected_status: None,
            actor: Actor::System,
        };
        let first = engine.transition(&order.order_id, &req).unwrap();
        let second = engine.transition(&order.order_id, &req).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            engine.get_order(&order.order_id).unwrap().status,
            OrderStatus::Confirmed
        );
    }

    #[test]
    fn activation_sweep_activates_due_awards_once() {
        let engine = engine();
        engine.checkout(&checkout_request("k1")).unwrap();

        assert_eq!(engine.run_activation_sweep().unwrap(), 1);
        let balance = engine.balance("alice").unwrap();
        assert_eq!(balance.active, 5);
        assert_eq!(balance.pending, 0);

        // Second sweep finds nothing.
        assert_eq!(engine.run_activation_sweep().unwrap(), 0);
        assert_eq!(engine.balance("alice").unwrap().active, 5);
    }

    #[test]
    fn cancelled_award_never_activates() {
        let engine = engine();
        let order = engine.checkout(&checkout_request("k1")).unwrap();
        engine
            .transition(
                &order.order_id,
                &TransitionRequest {
                    idempotency_key: "t1".to_string(),
                    target: OrderStatus::Cancelled,
                    expected_status: None,
                    actor: Actor::Customer("alice".to_string()),
                },
            )
            .unwrap();

        assert_eq!(engine.run_activation_sweep().unwrap(), 0);
        let balance = engine.balance("alice").unwrap();
        assert_eq!(balance.active, 0);
        assert_eq!(balance.pending, 0);
    }

    #[test]
    fn return_replay_records_one_return() {
        let engine = engine();
        let order = engine.checkout(&checkout_request("k1")).unwrap();
        for (i, target) in [
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ]
        .into_iter()
        .enumerate()
        {
            engine
                .transition(
                    &order.order_id,
                    &TransitionRequest {
                        idempotency_key: format!("t{i}"),
                        target,
                        expected_status: None,
                        actor: Actor::System,
                    },
                )
                .unwrap();
        }

        let req = ReturnRequest {
            idempotency_key: "r1".to_string(),
            items: vec![ReturnItem {
                product_id: "bear".to_string(),
                quantity: 1,
            }],
            reason: Some("damaged".to_string()),
        };
        let first = engine.process_return(&order.order_id, &req).unwrap();
        let second = engine.process_return(&order.order_id, &req).unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.order_returns(&order.order_id).unwrap().len(), 1);
        // Restocked exactly once.
        assert_eq!(engine.storage().get_stock("bear").unwrap(), 10);
    }

    #[test]
    fn reconcile_halts_divergent_customers() {
        let engine = engine();
        engine.checkout(&checkout_request("k1")).unwrap();

        // Corrupt the cache directly.
        let txn = engine.storage().begin_write().unwrap();
        engine
            .storage()
            .store_balance_txn(
                &txn,
                "alice",
                &BonusBalance {
                    active: 500,
                    pending: 5,
                    seq: 1,
                },
            )
            .unwrap();
        txn.commit().unwrap();

        let divergent = engine.reconcile_all().unwrap();
        assert_eq!(divergent, vec!["alice".to_string()]);
        assert!(engine.is_halted("alice"));

        // Halted customers are frozen: no checkout, no activation.
        assert!(engine.checkout(&checkout_request("k2")).is_err());
        assert_eq!(engine.run_activation_sweep().unwrap(), 0);
    }
}
