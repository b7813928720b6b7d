//! Order state machine
//!
//! The happy path is a linear chain; `Cancelled` is reachable from any
//! non-terminal state. Cancellation is where the ledger work happens:
//! spent points are credited back, and the order's pending award is voided
//! so it never activates.

use serde::{Deserialize, Serialize};
use shared::ledger::LedgerEntryKind;
use shared::order::{Actor, CancelledBy, Order, OrderStatus};
use shared::now_millis;
use validator::Validate;

use super::error::{EngineError, EngineResult};
use super::ledger::{append_entry, reversed_pending_for_order, EntryParams};
use super::storage::Storage;

/// Transition command payload
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TransitionRequest {
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: String,
    pub target: OrderStatus,
    /// Compare-and-set guard: reject if the order moved since the caller
    /// last read it
    #[serde(default)]
    pub expected_status: Option<OrderStatus>,
    pub actor: Actor,
}

/// Outcome returned to the caller (and stored for idempotent replay)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub order_id: String,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub updated_at: i64,
}

/// Whether `from -> to` is a legal edge of the state machine
pub fn transition_allowed(from: OrderStatus, to: OrderStatus) -> bool {
    if to == OrderStatus::Cancelled {
        return !from.is_terminal();
    }
    from.next_in_chain() == Some(to)
}

/// Apply a transition inside the caller's transaction.
pub fn apply_transition(
    storage: &Storage,
    txn: &redb::WriteTransaction,
    order_id: &str,
    request: &TransitionRequest,
) -> EngineResult<(Order, TransitionOutcome)> {
    let mut order = storage
        .get_order_txn(txn, order_id)?
        .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;

    if let Some(expected) = request.expected_status {
        if order.status != expected {
            return Err(EngineError::ConcurrentModification {
                expected,
                actual: order.status,
            });
        }
    }

    let from = order.status;
    if from == request.target {
        // Repeating an already-applied transition is a no-op, not an error;
        // side effects must not run twice.
        let outcome = TransitionOutcome {
            order_id: order.order_id.clone(),
            from,
            to: from,
            updated_at: order.updated_at,
        };
        return Ok((order, outcome));
    }
    if !transition_allowed(from, request.target) {
        return Err(EngineError::InvalidTransition {
            from,
            to: request.target,
        });
    }

    let now = now_millis();
    match request.target {
        OrderStatus::Cancelled => {
            cancel_side_effects(storage, txn, &order, &request.actor)?;
            order.cancelled_by = Some(CancelledBy::from(&request.actor));
        }
        OrderStatus::Delivered => {
            order.delivered_at = Some(now);
        }
        _ => {}
    }

    order.status = request.target;
    order.updated_at = now;
    storage.store_order(txn, &order)?;

    let outcome = TransitionOutcome {
        order_id: order.order_id.clone(),
        from,
        to: order.status,
        updated_at: now,
    };
    Ok((order, outcome))
}

/// Undo the checkout's side effects when an order is cancelled.
///
/// Stock goes back on the shelf; spent points are credited back as a
/// Reversal; the order's still-pending award is voided by a negative
/// pending Reversal plus a queue dequeue, leaving the AwardPending entry
/// itself untouched. An award that already activated is clawed back from
/// the active balance, clamped at what remains.
fn cancel_side_effects(
    storage: &Storage,
    txn: &redb::WriteTransaction,
    order: &Order,
    actor: &Actor,
) -> EngineResult<()> {
    for item in &order.items {
        let stock = storage.get_stock_txn(txn, &item.product_id)?;
        storage.set_stock_txn(txn, &item.product_id, stock + item.quantity)?;
    }

    let Some(customer_id) = order.customer_id.as_deref() else {
        return Ok(());
    };

    if order.bonuses_spent > 0 {
        append_entry(
            storage,
            txn,
            EntryParams {
                customer_id,
                order_id: Some(&order.order_id),
                kind: LedgerEntryKind::Reversal,
                amount: order.bonuses_spent,
                active_delta: order.bonuses_spent,
                pending_delta: 0,
                activation_due_at: None,
                note: Some(format!("spend refund, cancelled by {}", actor.describe())),
            },
        )?;
    }

    if order.bonuses_awarded > 0 {
        void_award(storage, txn, order, customer_id)?;
    }
    Ok(())
}

fn void_award(
    storage: &Storage,
    txn: &redb::WriteTransaction,
    order: &Order,
    customer_id: &str,
) -> EngineResult<()> {
    // Find the order's award among the still-queued (unactivated) entries.
    let mut pending_seq = None;
    for (seq, _due_at) in storage.queued_activations_txn(txn, customer_id)? {
        let Some(entry) = storage.get_ledger_entry_txn(txn, customer_id, seq)? else {
            continue;
        };
        if entry.kind == LedgerEntryKind::AwardPending
            && entry.order_id.as_deref() == Some(order.order_id.as_str())
        {
            pending_seq = Some((seq, entry.amount));
            break;
        }
    }

    match pending_seq {
        Some((seq, award)) => {
            let entries = storage.ledger_entries_txn(txn, customer_id)?;
            let remaining = award - reversed_pending_for_order(&entries, &order.order_id);
            if remaining > 0 {
                append_entry(
                    storage,
                    txn,
                    EntryParams {
                        customer_id,
                        order_id: Some(&order.order_id),
                        kind: LedgerEntryKind::Reversal,
                        amount: remaining,
                        active_delta: 0,
                        pending_delta: -remaining,
                        activation_due_at: None,
                        note: Some("pending award voided on cancellation".to_string()),
                    },
                )?;
            }
            storage.dequeue_activation_txn(txn, customer_id, seq)?;
        }
        None => {
            // Award already activated; claw back from the active balance,
            // clamped at what the customer still has.
            let balance = storage.get_balance_txn(txn, customer_id)?;
            let clawback = order.bonuses_awarded.min(balance.active);
            if clawback > 0 {
                let note = if clawback < order.bonuses_awarded {
                    format!(
                        "activated award clawed back on cancellation ({} of {} available)",
                        clawback, order.bonuses_awarded
                    )
                } else {
                    "activated award clawed back on cancellation".to_string()
                };
                append_entry(
                    storage,
                    txn,
                    EntryParams {
                        customer_id,
                        order_id: Some(&order.order_id),
                        kind: LedgerEntryKind::Reversal,
                        amount: clawback,
                        active_delta: -clawback,
                        pending_delta: 0,
                        activation_due_at: None,
                        note: Some(note),
                    },
                )?;
            }
        }
    }
    Ok(())
}
