//! Shared order types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// Order Status
// ============================================================================

/// Order status
///
/// Happy path is linear: `New → Confirmed → Processing → Shipped → Delivered`.
/// `Cancelled` is reachable from every non-terminal state. `Delivered` and
/// `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    New,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// The next status on the linear happy path, if any
    pub fn next_in_chain(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::New => Some(OrderStatus::Confirmed),
            OrderStatus::Confirmed => Some(OrderStatus::Processing),
            OrderStatus::Processing => Some(OrderStatus::Shipped),
            OrderStatus::Shipped => Some(OrderStatus::Delivered),
            OrderStatus::Delivered | OrderStatus::Cancelled => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::New => "NEW",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Actors
// ============================================================================

/// Who issued a command against an order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "kind", content = "id")]
pub enum Actor {
    /// The customer who owns the order
    Customer(String),
    /// A store operator (admin console / chat side channel)
    Operator(String),
    /// Automated system action (scheduler, reconciliation)
    System,
}

impl Actor {
    pub fn describe(&self) -> String {
        match self {
            Actor::Customer(id) => format!("customer {id}"),
            Actor::Operator(id) => format!("operator {id}"),
            Actor::System => "system".to_string(),
        }
    }
}

/// Who cancelled an order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelledBy {
    Customer,
    Operator,
    System,
}

impl From<&Actor> for CancelledBy {
    fn from(actor: &Actor) -> Self {
        match actor {
            Actor::Customer(_) => CancelledBy::Customer,
            Actor::Operator(_) => CancelledBy::Operator,
            Actor::System => CancelledBy::System,
        }
    }
}

// ============================================================================
// Delivery / Payment
// ============================================================================

/// Delivery method chosen at checkout
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMethod {
    #[default]
    Courier,
    Pickup,
    Post,
}

/// Payment method chosen at checkout
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    #[default]
    Card,
    CashOnDelivery,
}

// ============================================================================
// Order
// ============================================================================

/// Contact fields carried by guest orders (no customer account)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuestContact {
    pub name: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Order line item - immutable once the order is created
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    /// Product ID
    pub product_id: String,
    /// Product name snapshot at checkout time
    pub name: String,
    /// Ordered quantity
    pub quantity: u32,
    /// Unit price snapshot (authoritative, read at commit time)
    pub unit_price: Decimal,
    /// Bonus points awarded per unit
    pub unit_bonus_award: i64,
}

impl OrderItem {
    /// Line total before any order-level discount
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Durable order record
///
/// Owned exclusively by the engine's order store; mutated only through the
/// guarded transition function. Never deleted (append-only audit trail).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    /// Opaque, globally unique ID
    pub order_id: String,
    /// Creation timestamp (unix millis)
    pub created_at: i64,
    /// Last mutation timestamp (unix millis)
    pub updated_at: i64,
    /// Current status
    pub status: OrderStatus,
    /// Customer reference; `None` for guest orders
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// Contact fields for guest orders
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_contact: Option<GuestContact>,
    /// Line items (immutable after creation)
    pub items: Vec<OrderItem>,
    /// Sum of line totals before discount
    pub total_amount: Decimal,
    /// Discount applied from spent bonuses (1 point = 1 currency unit)
    pub discount_amount: Decimal,
    /// Amount actually charged: `total_amount - discount_amount`, floored at zero
    pub final_amount: Decimal,
    /// Bonus points spent on this order
    pub bonuses_spent: i64,
    /// Bonus points awarded by this order (pending until activation)
    pub bonuses_awarded: i64,
    /// Delivery method
    pub delivery_method: DeliveryMethod,
    /// Payment method
    pub payment_method: PaymentMethod,
    /// Operator who took the order, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_operator: Option<String>,
    /// Who cancelled the order (set on transition into Cancelled)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<CancelledBy>,
    /// Delivery timestamp, set on transition into Delivered.
    /// Anchors the return window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<i64>,
    /// Opaque handle to the mirrored operator notification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_message_ref: Option<String>,
}

impl Order {
    /// Quantity of `product_id` on the order, 0 if absent
    pub fn ordered_quantity(&self, product_id: &str) -> u32 {
        self.items
            .iter()
            .filter(|i| i.product_id == product_id)
            .map(|i| i.quantity)
            .sum()
    }
}

// ============================================================================
// Returns
// ============================================================================

/// One returned line in a partial return request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReturnItem {
    pub product_id: String,
    pub quantity: u32,
}

/// Durable record of one (possibly partial) return against an order
///
/// Append-only: one order may accumulate multiple partial returns. The sum
/// of returned quantities per item never exceeds the ordered quantity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderReturn {
    pub return_id: String,
    pub order_id: String,
    pub items: Vec<ReturnItem>,
    /// Currency refunded to the customer
    pub refund_amount: Decimal,
    /// Bonus points clawed back for the returned share of the award
    pub bonus_reversal_amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: i64,
}

impl OrderReturn {
    /// Returned quantity of `product_id` in this record
    pub fn returned_quantity(&self, product_id: &str) -> u32 {
        self.items
            .iter()
            .filter(|i| i.product_id == product_id)
            .map(|i| i.quantity)
            .sum()
    }
}
