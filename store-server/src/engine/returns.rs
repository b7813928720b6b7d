//! Return and refund processing
//!
//! Returns are accepted only against delivered orders, inside the return
//! window anchored at `delivered_at`. An order may accumulate several
//! partial returns; the cumulative returned quantity per item never exceeds
//! the ordered quantity. The refund carries a proportional share of the
//! order's bonus discount, and the returned share of the bonus award is
//! clawed back, pending points first.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::ledger::LedgerEntryKind;
use shared::order::{Order, OrderReturn, OrderStatus, ReturnItem};
use shared::{new_entity_id, now_millis};
use validator::Validate;

use super::error::{EngineError, EngineResult};
use super::ledger::{append_entry, reversed_pending_for_order, EntryParams};
use super::storage::Storage;

/// Return command payload
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReturnRequest {
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: String,
    #[validate(length(min = 1))]
    pub items: Vec<ReturnItem>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Outcome returned to the caller (and stored for idempotent replay)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReturnOutcome {
    pub return_id: String,
    pub order_id: String,
    pub refund_amount: Decimal,
    pub bonus_reversal_amount: i64,
}

/// Apply a return inside the caller's transaction.
pub fn apply_return(
    storage: &Storage,
    txn: &redb::WriteTransaction,
    order_id: &str,
    request: &ReturnRequest,
    return_window_ms: i64,
) -> EngineResult<OrderReturn> {
    let order = storage
        .get_order_txn(txn, order_id)?
        .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;

    if order.status != OrderStatus::Delivered {
        return Err(EngineError::ReturnNotAllowed(format!(
            "order is {}, returns require DELIVERED",
            order.status
        )));
    }
    let delivered_at = order.delivered_at.ok_or_else(|| {
        EngineError::InvalidOperation("delivered order missing delivered_at".to_string())
    })?;
    let now = now_millis();
    if now - delivered_at > return_window_ms {
        return Err(EngineError::ReturnNotAllowed(
            "return window has closed".to_string(),
        ));
    }
    if request.items.is_empty() {
        return Err(EngineError::InvalidOperation(
            "return with no items".to_string(),
        ));
    }
    if request.items.iter().any(|i| i.quantity == 0) {
        return Err(EngineError::InvalidOperation(
            "return line with zero quantity".to_string(),
        ));
    }
    // One line per product keeps the per-line caps below airtight.
    let mut seen = std::collections::HashSet::new();
    if !request.items.iter().all(|i| seen.insert(&i.product_id)) {
        return Err(EngineError::InvalidOperation(
            "duplicate product in return".to_string(),
        ));
    }

    // Cap each line at ordered minus already returned, cumulatively.
    let prior = storage.returns_for_order_txn(txn, order_id)?;
    for line in &request.items {
        let ordered = order.ordered_quantity(&line.product_id);
        let already: u32 = prior.iter().map(|r| r.returned_quantity(&line.product_id)).sum();
        let returnable = ordered.saturating_sub(already);
        if line.quantity > returnable {
            return Err(EngineError::OverReturn {
                product_id: line.product_id.clone(),
                requested: line.quantity,
                returnable,
            });
        }
    }

    let refund_amount = refund_for(&order, &request.items);
    let bonus_reversal = bonus_reversal_for(&order, &request.items);

    // Validation done - start mutating.
    for line in &request.items {
        let stock = storage.get_stock_txn(txn, &line.product_id)?;
        storage.set_stock_txn(txn, &line.product_id, stock + line.quantity)?;
    }

    if bonus_reversal > 0 {
        if let Some(customer_id) = order.customer_id.as_deref() {
            claw_back(storage, txn, &order, customer_id, bonus_reversal)?;
        }
    }

    let record = OrderReturn {
        return_id: new_entity_id("ret"),
        order_id: order.order_id.clone(),
        items: request.items.clone(),
        refund_amount,
        bonus_reversal_amount: bonus_reversal,
        reason: request.reason.clone(),
        created_at: now,
    };
    storage.store_return_txn(txn, &record)?;
    Ok(record)
}

/// Currency to refund: the returned lines at their snapshot prices, minus a
/// proportional share of the order's bonus discount.
fn refund_for(order: &Order, items: &[ReturnItem]) -> Decimal {
    let returned_value: Decimal = items
        .iter()
        .filter_map(|line| {
            order
                .items
                .iter()
                .find(|i| i.product_id == line.product_id)
                .map(|i| i.unit_price * Decimal::from(line.quantity))
        })
        .sum();
    if order.total_amount.is_zero() {
        return Decimal::ZERO;
    }
    let discount_share =
        (order.discount_amount * returned_value / order.total_amount).round_dp(2);
    (returned_value - discount_share).max(Decimal::ZERO)
}

/// Bonus points to claw back for the returned share of the award
fn bonus_reversal_for(order: &Order, items: &[ReturnItem]) -> i64 {
    if order.customer_id.is_none() {
        return 0;
    }
    items
        .iter()
        .filter_map(|line| {
            order
                .items
                .iter()
                .find(|i| i.product_id == line.product_id)
                .map(|i| i.unit_bonus_award * i64::from(line.quantity))
        })
        .sum()
}

/// Remove `points` from the customer, pending first.
///
/// While the order's award is still queued, the claw-back comes out of the
/// pending balance and shrinks what the activation sweep will later
/// activate. Once the award has activated (or pending is exhausted) the
/// remainder comes from the active balance, clamped at what is left.
fn claw_back(
    storage: &Storage,
    txn: &redb::WriteTransaction,
    order: &Order,
    customer_id: &str,
    points: i64,
) -> EngineResult<()> {
    let mut remainder = points;

    let mut queued_seq = None;
    for (seq, _due_at) in storage.queued_activations_txn(txn, customer_id)? {
        let Some(entry) = storage.get_ledger_entry_txn(txn, customer_id, seq)? else {
            continue;
        };
        if entry.kind == LedgerEntryKind::AwardPending
            && entry.order_id.as_deref() == Some(order.order_id.as_str())
        {
            queued_seq = Some((seq, entry.amount));
            break;
        }
    }

    if let Some((seq, award)) = queued_seq {
        let entries = storage.ledger_entries_txn(txn, customer_id)?;
        let pending_left = award - reversed_pending_for_order(&entries, &order.order_id);
        let from_pending = remainder.min(pending_left.max(0));
        if from_pending > 0 {
            append_entry(
                storage,
                txn,
                EntryParams {
                    customer_id,
                    order_id: Some(&order.order_id),
                    kind: LedgerEntryKind::Reversal,
                    amount: from_pending,
                    active_delta: 0,
                    pending_delta: -from_pending,
                    activation_due_at: None,
                    note: Some("award reduced by return".to_string()),
                },
            )?;
            remainder -= from_pending;
        }
        if pending_left - from_pending <= 0 {
            storage.dequeue_activation_txn(txn, customer_id, seq)?;
        }
    }

    if remainder > 0 {
        let balance = storage.get_balance_txn(txn, customer_id)?;
        let from_active = remainder.min(balance.active);
        if from_active > 0 {
            let note = if from_active < remainder {
                format!(
                    "activated award clawed back by return ({} of {} available)",
                    from_active, remainder
                )
            } else {
                "activated award clawed back by return".to_string()
            };
            append_entry(
                storage,
                txn,
                EntryParams {
                    customer_id,
                    order_id: Some(&order.order_id),
                    kind: LedgerEntryKind::Reversal,
                    amount: from_active,
                    active_delta: -from_active,
                    pending_delta: 0,
                    activation_due_at: None,
                    note: Some(note),
                },
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::checkout::{apply_checkout, CartLine, CheckoutRequest};
    use crate::engine::storage::Product;
    use crate::engine::transition::{apply_transition, TransitionRequest};
    use shared::ledger::BonusBalance;
    use shared::order::{Actor, DeliveryMethod, PaymentMethod};

    const WINDOW: i64 = 60_000;

    fn delivered_order(storage: &Storage, bonuses_to_spend: i64) -> Order {
        storage
            .upsert_product(
                &Product {
                    product_id: "bear".to_string(),
                    name: "Plush Bear".to_string(),
                    price: Decimal::new(2000, 2), // 20.00
                    bonus_award_rate: 5,
                },
                10,
            )
            .unwrap();
        storage
            .upsert_product(
                &Product {
                    product_id: "kite".to_string(),
                    name: "Box Kite".to_string(),
                    price: Decimal::new(1000, 2), // 10.00
                    bonus_award_rate: 2,
                },
                10,
            )
            .unwrap();
        let req = CheckoutRequest {
            idempotency_key: "key-1".to_string(),
            items: vec![
                CartLine {
                    product_id: "bear".to_string(),
                    quantity: 2,
                },
                CartLine {
                    product_id: "kite".to_string(),
                    quantity: 1,
                },
            ],
            delivery_method: DeliveryMethod::Courier,
            payment_method: PaymentMethod::Card,
            bonuses_to_spend,
            customer_id: Some("alice".to_string()),
            guest_contact: None,
            assigned_operator: None,
        };
        let txn = storage.begin_write().unwrap();
        let (order, _) = apply_checkout(storage, &txn, &req, 60_000).unwrap();
        txn.commit().unwrap();

        for target in [
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ] {
            let treq = TransitionRequest {
                idempotency_key: format!("t-{target}"),
                target,
                expected_status: None,
                actor: Actor::System,
            };
            let txn = storage.begin_write().unwrap();
            apply_transition(storage, &txn, &order.order_id, &treq).unwrap();
            txn.commit().unwrap();
        }
        storage.get_order(&order.order_id).unwrap().unwrap()
    }

    fn make_return(
        storage: &Storage,
        order_id: &str,
        items: Vec<ReturnItem>,
    ) -> EngineResult<OrderReturn> {
        let req = ReturnRequest {
            idempotency_key: new_entity_id("key"),
            items,
            reason: None,
        };
        let txn = storage.begin_write().unwrap();
        match apply_return(storage, &txn, order_id, &req, WINDOW) {
            Ok(record) => {
                txn.commit().unwrap();
                Ok(record)
            }
            Err(e) => Err(e),
        }
    }

    #[test]
    fn return_before_delivery_is_rejected() {
        let storage = Storage::open_in_memory().unwrap();
        storage
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
        let req = CheckoutRequest {
            idempotency_key: "key-1".to_string(),
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
        };
        let txn = storage.begin_write().unwrap();
        let (order, _) = apply_checkout(&storage, &txn, &req, WINDOW).unwrap();
        txn.commit().unwrap();

        assert!(matches!(
            make_return(
                &storage,
                &order.order_id,
                vec![ReturnItem {
                    product_id: "bear".to_string(),
                    quantity: 1
                }]
            ),
            Err(EngineError::ReturnNotAllowed(_))
        ));
    }

    #[test]
    fn partial_return_refunds_proportional_discount_share() {
        let storage = Storage::open_in_memory().unwrap();
        // Seed active points so the order carries a discount.
        let txn = storage.begin_write().unwrap();
        storage
            .store_balance_txn(&txn, "alice", &BonusBalance { active: 10, pending: 0, seq: 1 })
            .unwrap();
        txn.commit().unwrap();

        // Total 50.00, discount 10.00, bear value 40.00.
        let order = delivered_order(&storage, 10);
        assert_eq!(order.final_amount, Decimal::new(4000, 2));

        let record = make_return(
            &storage,
            &order.order_id,
            vec![ReturnItem {
                product_id: "bear".to_string(),
                quantity: 1,
            }],
        )
        .unwrap();

        // Returned value 20.00; discount share 10 * 20/50 = 4.00.
        assert_eq!(record.refund_amount, Decimal::new(1600, 2));
        assert_eq!(record.bonus_reversal_amount, 5);
        assert_eq!(storage.get_stock("bear").unwrap(), 9);
    }

    #[test]
    fn cumulative_returns_cap_at_ordered_quantity() {
        let storage = Storage::open_in_memory().unwrap();
        let order = delivered_order(&storage, 0);

        make_return(
            &storage,
            &order.order_id,
            vec![ReturnItem {
                product_id: "bear".to_string(),
                quantity: 1,
            }],
        )
        .unwrap();
        make_return(
            &storage,
            &order.order_id,
            vec![ReturnItem {
                product_id: "bear".to_string(),
                quantity: 1,
            }],
        )
        .unwrap();

        // Both units are back; a third is over the cap.
        assert!(matches!(
            make_return(
                &storage,
                &order.order_id,
                vec![ReturnItem {
                    product_id: "bear".to_string(),
                    quantity: 1
                }]
            ),
            Err(EngineError::OverReturn {
                requested: 1,
                returnable: 0,
                ..
            })
        ));
    }

    #[test]
    fn claw_back_prefers_pending_and_shrinks_future_activation() {
        let storage = Storage::open_in_memory().unwrap();
        let order = delivered_order(&storage, 0); // award 12 pending (2*5 + 1*2)

        make_return(
            &storage,
            &order.order_id,
            vec![ReturnItem {
                product_id: "bear".to_string(),
                quantity: 1, // claws back 5
            }],
        )
        .unwrap();

        let balance = storage.get_balance("alice").unwrap();
        assert_eq!(balance.pending, 7);
        assert_eq!(balance.active, 0);
        // Award entry still queued; the sweep will activate the remainder.
        assert_eq!(storage.due_activations(i64::MAX).unwrap().len(), 1);
        crate::engine::ledger::verify_customer(&storage, "alice").unwrap();
    }

    #[test]
    fn full_return_dequeues_the_award() {
        let storage = Storage::open_in_memory().unwrap();
        let order = delivered_order(&storage, 0);

        make_return(
            &storage,
            &order.order_id,
            vec![
                ReturnItem {
                    product_id: "bear".to_string(),
                    quantity: 2,
                },
                ReturnItem {
                    product_id: "kite".to_string(),
                    quantity: 1,
                },
            ],
        )
        .unwrap();

        let balance = storage.get_balance("alice").unwrap();
        assert_eq!(balance.pending, 0);
        assert!(storage.due_activations(i64::MAX).unwrap().is_empty());
    }

    #[test]
    fn claw_back_after_activation_clamps_at_active() {
        let storage = Storage::open_in_memory().unwrap();
        let order = delivered_order(&storage, 0); // award 12 pending

        // Activate, then spend most of it elsewhere.
        let txn = storage.begin_write().unwrap();
        storage.dequeue_activation_txn(&txn, "alice", 1).unwrap();
        append_entry(
            &storage,
            &txn,
            EntryParams {
                customer_id: "alice",
                order_id: Some(&order.order_id),
                kind: LedgerEntryKind::AwardActivated,
                amount: 12,
                active_delta: 12,
                pending_delta: -12,
                activation_due_at: None,
                note: None,
            },
        )
        .unwrap();
        append_entry(
            &storage,
            &txn,
            EntryParams {
                customer_id: "alice",
                order_id: None,
                kind: LedgerEntryKind::Spend,
                amount: 9,
                active_delta: -9,
                pending_delta: 0,
                activation_due_at: None,
                note: None,
            },
        )
        .unwrap();
        txn.commit().unwrap();

        let record = make_return(
            &storage,
            &order.order_id,
            vec![ReturnItem {
                product_id: "bear".to_string(),
                quantity: 1, // nominal claw-back of 5, only 3 active left
            }],
        )
        .unwrap();
        assert_eq!(record.bonus_reversal_amount, 5);

        let balance = storage.get_balance("alice").unwrap();
        assert_eq!(balance.active, 0);
        assert_eq!(balance.pending, 0);
        crate::engine::ledger::verify_customer(&storage, "alice").unwrap();
    }
}
