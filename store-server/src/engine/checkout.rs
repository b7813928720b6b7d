//! Checkout command
//!
//! Builds an order from a cart inside one write transaction: authoritative
//! price/stock reads, stock decrement, bonus spend and pending award, and
//! the order record itself all commit or fail together.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::ledger::LedgerEntryKind;
use shared::order::{
    DeliveryMethod, GuestContact, Order, OrderItem, OrderStatus, PaymentMethod,
};
use shared::{new_entity_id, now_millis};
use std::collections::BTreeMap;
use validator::Validate;

use super::error::{EngineError, EngineResult};
use super::ledger::{append_entry, EntryParams};
use super::storage::Storage;

/// One cart line as submitted by the client (quantities only; prices are
/// read from the catalog at commit time)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub quantity: u32,
}

/// Checkout command payload
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckoutRequest {
    /// Client-chosen key; replays return the original outcome
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: String,
    #[validate(length(min = 1))]
    pub items: Vec<CartLine>,
    #[serde(default)]
    pub delivery_method: DeliveryMethod,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    /// Active bonus points to redeem (1 point = 1 currency unit)
    #[serde(default)]
    pub bonuses_to_spend: i64,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub guest_contact: Option<GuestContact>,
    #[serde(default)]
    pub assigned_operator: Option<String>,
}

/// Outcome returned to the caller (and stored for idempotent replay)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutOutcome {
    pub order_id: String,
    pub status: OrderStatus,
    pub final_amount: Decimal,
    pub bonuses_spent: i64,
    pub bonuses_awarded: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_due_at: Option<i64>,
}

impl CheckoutOutcome {
    pub fn from_order(order: &Order, activation_due_at: Option<i64>) -> Self {
        Self {
            order_id: order.order_id.clone(),
            status: order.status,
            final_amount: order.final_amount,
            bonuses_spent: order.bonuses_spent,
            bonuses_awarded: order.bonuses_awarded,
            activation_due_at,
        }
    }
}

/// Apply a checkout inside the caller's transaction.
///
/// Returns the stored order and the activation due time of its pending
/// award, if one was created. All validation happens before the first
/// mutation.
pub fn apply_checkout(
    storage: &Storage,
    txn: &redb::WriteTransaction,
    request: &CheckoutRequest,
    activation_delay_ms: i64,
) -> EngineResult<(Order, Option<i64>)> {
    if request.items.is_empty() {
        return Err(EngineError::EmptyCart);
    }
    if request.items.iter().any(|line| line.quantity == 0) {
        return Err(EngineError::InvalidOperation(
            "cart line with zero quantity".to_string(),
        ));
    }
    if request.bonuses_to_spend < 0 {
        return Err(EngineError::InvalidOperation(
            "bonuses_to_spend must be non-negative".to_string(),
        ));
    }
    if request.customer_id.is_none() && request.bonuses_to_spend > 0 {
        return Err(EngineError::InvalidOperation(
            "guest orders cannot spend bonuses".to_string(),
        ));
    }
    if request.customer_id.is_none() && request.guest_contact.is_none() {
        return Err(EngineError::InvalidOperation(
            "guest orders require contact details".to_string(),
        ));
    }

    // Snapshot prices and bonus rates from the catalog, validating stock
    // before touching anything. Quantities are aggregated per product so a
    // cart with the same item on two lines is checked against the total.
    let mut items = Vec::with_capacity(request.items.len());
    let mut requested: BTreeMap<&str, u32> = BTreeMap::new();
    for line in &request.items {
        let product = storage
            .get_product_txn(txn, &line.product_id)?
            .ok_or_else(|| EngineError::ProductNotFound(line.product_id.clone()))?;
        *requested.entry(line.product_id.as_str()).or_default() += line.quantity;
        items.push(OrderItem {
            product_id: product.product_id,
            name: product.name,
            quantity: line.quantity,
            unit_price: product.price,
            unit_bonus_award: product.bonus_award_rate,
        });
    }
    for (&product_id, &quantity) in &requested {
        let available = storage.get_stock_txn(txn, product_id)?;
        if available < quantity {
            return Err(EngineError::OutOfStock {
                product_id: product_id.to_string(),
                requested: quantity,
                available,
            });
        }
    }

    let total_amount: Decimal = items.iter().map(OrderItem::line_total).sum();
    // Points redeem 1:1 against currency, capped at the order total rounded
    // up to a whole point. The active-balance cap is enforced by the ledger
    // append below.
    let discount_amount = Decimal::from(request.bonuses_to_spend);
    if discount_amount > total_amount.ceil() {
        return Err(EngineError::InvalidOperation(format!(
            "bonuses_to_spend {} exceeds order total {}",
            request.bonuses_to_spend, total_amount
        )));
    }
    // Spending the rounded-up total on a fractional order floors the charge
    // at zero rather than going negative.
    let final_amount = (total_amount - discount_amount).max(Decimal::ZERO);

    // Awards accrue to customer accounts only; guest orders earn nothing.
    let bonuses_awarded = if request.customer_id.is_some() {
        items
            .iter()
            .map(|i| i.unit_bonus_award * i64::from(i.quantity))
            .sum()
    } else {
        0
    };

    // Validation done - start mutating.
    for (&product_id, &quantity) in &requested {
        let available = storage.get_stock_txn(txn, product_id)?;
        storage.set_stock_txn(txn, product_id, available - quantity)?;
    }

    let now = now_millis();
    let order_id = new_entity_id("ord");
    let mut activation_due_at = None;

    if let Some(customer_id) = request.customer_id.as_deref() {
        if request.bonuses_to_spend > 0 {
            append_entry(
                storage,
                txn,
                EntryParams {
                    customer_id,
                    order_id: Some(&order_id),
                    kind: LedgerEntryKind::Spend,
                    amount: request.bonuses_to_spend,
                    active_delta: -request.bonuses_to_spend,
                    pending_delta: 0,
                    activation_due_at: None,
                    note: None,
                },
            )?;
        }
        if bonuses_awarded > 0 {
            let due_at = now + activation_delay_ms;
            let entry = append_entry(
                storage,
                txn,
                EntryParams {
                    customer_id,
                    order_id: Some(&order_id),
                    kind: LedgerEntryKind::AwardPending,
                    amount: bonuses_awarded,
                    active_delta: 0,
                    pending_delta: bonuses_awarded,
                    activation_due_at: Some(due_at),
                    note: None,
                },
            )?;
            storage.queue_activation_txn(txn, customer_id, entry.seq, due_at)?;
            activation_due_at = Some(due_at);
        }
    }

    let order = Order {
        order_id,
        created_at: now,
        updated_at: now,
        status: OrderStatus::New,
        customer_id: request.customer_id.clone(),
        guest_contact: request.guest_contact.clone(),
        items,
        total_amount,
        discount_amount,
        final_amount,
        bonuses_spent: request.bonuses_to_spend,
        bonuses_awarded,
        delivery_method: request.delivery_method,
        payment_method: request.payment_method,
        assigned_operator: request.assigned_operator.clone(),
        cancelled_by: None,
        delivered_at: None,
        external_message_ref: None,
    };
    storage.store_order(txn, &order)?;

    Ok((order, activation_due_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::Product;
    use shared::ledger::BonusBalance;

    fn seed_catalog(storage: &Storage) {
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
                    price: Decimal::new(1550, 2), // 15.50
                    bonus_award_rate: 3,
                },
                2,
            )
            .unwrap();
    }

    fn request(items: Vec<CartLine>) -> CheckoutRequest {
        CheckoutRequest {
            idempotency_key: "key-1".to_string(),
            items,
            delivery_method: DeliveryMethod::Courier,
            payment_method: PaymentMethod::Card,
            bonuses_to_spend: 0,
            customer_id: Some("alice".to_string()),
            guest_contact: None,
            assigned_operator: None,
        }
    }

    #[test]
    fn checkout_snapshots_prices_and_decrements_stock() {
        let storage = Storage::open_in_memory().unwrap();
        seed_catalog(&storage);

        let req = request(vec![
            CartLine {
                product_id: "bear".to_string(),
                quantity: 2,
            },
            CartLine {
                product_id: "kite".to_string(),
                quantity: 1,
            },
        ]);
        let txn = storage.begin_write().unwrap();
        let (order, due) = apply_checkout(&storage, &txn, &req, 1_000).unwrap();
        txn.commit().unwrap();

        assert_eq!(order.total_amount, Decimal::new(5550, 2)); // 55.50
        assert_eq!(order.final_amount, order.total_amount);
        assert_eq!(order.bonuses_awarded, 13); // 2*5 + 1*3
        assert_eq!(order.status, OrderStatus::New);
        assert!(due.is_some());
        assert_eq!(storage.get_stock("bear").unwrap(), 8);
        assert_eq!(storage.get_stock("kite").unwrap(), 1);

        let balance = storage.get_balance("alice").unwrap();
        assert_eq!(balance, BonusBalance { active: 0, pending: 13, seq: 1 });
    }

    #[test]
    fn checkout_spends_active_points_as_discount() {
        let storage = Storage::open_in_memory().unwrap();
        seed_catalog(&storage);
        // Give alice some active points directly.
        let txn = storage.begin_write().unwrap();
        storage
            .store_balance_txn(&txn, "alice", &BonusBalance { active: 10, pending: 0, seq: 3 })
            .unwrap();
        txn.commit().unwrap();

        let mut req = request(vec![CartLine {
            product_id: "bear".to_string(),
            quantity: 1,
        }]);
        req.bonuses_to_spend = 10;

        let txn = storage.begin_write().unwrap();
        let (order, _) = apply_checkout(&storage, &txn, &req, 1_000).unwrap();
        txn.commit().unwrap();

        assert_eq!(order.discount_amount, Decimal::from(10));
        assert_eq!(order.final_amount, Decimal::new(1000, 2)); // 20.00 - 10
        let balance = storage.get_balance("alice").unwrap();
        assert_eq!(balance.active, 0);
        assert_eq!(balance.pending, 5);
    }

    #[test]
    fn out_of_stock_leaves_nothing_behind() {
        let storage = Storage::open_in_memory().unwrap();
        seed_catalog(&storage);

        let req = request(vec![
            CartLine {
                product_id: "bear".to_string(),
                quantity: 1,
            },
            CartLine {
                product_id: "kite".to_string(),
                quantity: 3, // only 2 in stock
            },
        ]);
        let txn = storage.begin_write().unwrap();
        let result = apply_checkout(&storage, &txn, &req, 1_000);
        assert!(matches!(
            result,
            Err(EngineError::OutOfStock { requested: 3, available: 2, .. })
        ));
        drop(result);
        txn.commit().unwrap();

        // Validation failed before any mutation.
        assert_eq!(storage.get_stock("bear").unwrap(), 10);
        assert!(storage.ledger_entries("alice").unwrap().is_empty());
    }

    #[test]
    fn guest_checkout_awards_nothing_and_cannot_spend() {
        let storage = Storage::open_in_memory().unwrap();
        seed_catalog(&storage);

        let mut req = request(vec![CartLine {
            product_id: "bear".to_string(),
            quantity: 1,
        }]);
        req.customer_id = None;
        req.guest_contact = Some(GuestContact {
            name: "Walk-in".to_string(),
            phone: "+1-555-0100".to_string(),
            email: None,
        });

        let txn = storage.begin_write().unwrap();
        let (order, due) = apply_checkout(&storage, &txn, &req, 1_000).unwrap();
        txn.commit().unwrap();
        assert_eq!(order.bonuses_awarded, 0);
        assert!(due.is_none());

        req.bonuses_to_spend = 5;
        let txn = storage.begin_write().unwrap();
        assert!(matches!(
            apply_checkout(&storage, &txn, &req, 1_000),
            Err(EngineError::InvalidOperation(_))
        ));
    }

    #[test]
    fn empty_cart_is_rejected() {
        let storage = Storage::open_in_memory().unwrap();
        let req = request(vec![]);
        let txn = storage.begin_write().unwrap();
        assert!(matches!(
            apply_checkout(&storage, &txn, &req, 1_000),
            Err(EngineError::EmptyCart)
        ));
    }

    #[test]
    fn spend_beyond_order_total_is_rejected() {
        let storage = Storage::open_in_memory().unwrap();
        seed_catalog(&storage);
        let txn = storage.begin_write().unwrap();
        storage
            .store_balance_txn(&txn, "alice", &BonusBalance { active: 100, pending: 0, seq: 1 })
            .unwrap();
        txn.commit().unwrap();

        let mut req = request(vec![CartLine {
            product_id: "bear".to_string(),
            quantity: 1, // total 20.00
        }]);
        req.bonuses_to_spend = 25;

        let txn = storage.begin_write().unwrap();
        assert!(matches!(
            apply_checkout(&storage, &txn, &req, 1_000),
            Err(EngineError::InvalidOperation(_))
        ));
        drop(txn);

        // No points burned, no stock reserved.
        assert_eq!(storage.get_balance("alice").unwrap().active, 100);
        assert_eq!(storage.get_stock("bear").unwrap(), 10);
    }

    #[test]
    fn spend_up_to_the_rounded_total_floors_the_charge_at_zero() {
        let storage = Storage::open_in_memory().unwrap();
        seed_catalog(&storage);
        let txn = storage.begin_write().unwrap();
        storage
            .store_balance_txn(&txn, "alice", &BonusBalance { active: 20, pending: 0, seq: 1 })
            .unwrap();
        txn.commit().unwrap();

        // 15.50 order, 16 points: within the rounded-up total but above the
        // exact one.
        let mut req = request(vec![CartLine {
            product_id: "kite".to_string(),
            quantity: 1,
        }]);
        req.bonuses_to_spend = 16;

        let txn = storage.begin_write().unwrap();
        let (order, _) = apply_checkout(&storage, &txn, &req, 1_000).unwrap();
        txn.commit().unwrap();

        assert_eq!(order.final_amount, Decimal::ZERO);
        assert_eq!(order.bonuses_spent, 16);
        assert_eq!(storage.get_balance("alice").unwrap().active, 4);
    }

    #[test]
    fn failed_spend_after_stock_reservation_rolls_back() {
        let storage = Storage::open_in_memory().unwrap();
        seed_catalog(&storage);

        // Stock is plentiful but alice holds no points: the spend entry
        // fails after stock was already decremented, and dropping the
        // transaction must undo the reservation too.
        let mut req = request(vec![CartLine {
            product_id: "bear".to_string(),
            quantity: 1,
        }]);
        req.bonuses_to_spend = 10;

        let txn = storage.begin_write().unwrap();
        assert!(matches!(
            apply_checkout(&storage, &txn, &req, 1_000),
            Err(EngineError::InsufficientBonusBalance { requested: 10, available: 0 })
        ));
        drop(txn);

        assert_eq!(storage.get_stock("bear").unwrap(), 10);
        assert!(storage.ledger_entries("alice").unwrap().is_empty());
        assert_eq!(storage.get_balance("alice").unwrap(), BonusBalance::default());
    }

    #[test]
    fn duplicate_cart_lines_are_capped_against_total_stock() {
        let storage = Storage::open_in_memory().unwrap();
        seed_catalog(&storage);

        // Two kite lines of 1 and 2 against stock 2.
        let req = request(vec![
            CartLine {
                product_id: "kite".to_string(),
                quantity: 1,
            },
            CartLine {
                product_id: "kite".to_string(),
                quantity: 2,
            },
        ]);
        let txn = storage.begin_write().unwrap();
        assert!(matches!(
            apply_checkout(&storage, &txn, &req, 1_000),
            Err(EngineError::OutOfStock { requested: 3, available: 2, .. })
        ));
    }
}
