//! Operator notification side channel
//!
//! Engine commands emit notifications after their transaction commits; a
//! background worker mirrors them to the operator channel (webhook).
//! Delivery is best-effort with retry: a dead channel never blocks or
//! fails a checkout.

pub mod webhook;
pub mod worker;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::order::OrderStatus;
use thiserror::Error;

pub use webhook::{NullChannel, WebhookChannel};
pub use worker::NotifyWorker;

/// Event mirrored to the operator channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "event")]
pub enum OrderNotification {
    OrderCreated {
        order_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        customer_id: Option<String>,
        final_amount: Decimal,
        bonuses_awarded: i64,
    },
    OrderTransitioned {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },
    ReturnProcessed {
        order_id: String,
        return_id: String,
        refund_amount: Decimal,
    },
}

impl OrderNotification {
    /// The order this notification is about
    pub fn order_id(&self) -> &str {
        match self {
            OrderNotification::OrderCreated { order_id, .. }
            | OrderNotification::OrderTransitioned { order_id, .. }
            | OrderNotification::ReturnProcessed { order_id, .. } => order_id,
        }
    }

    /// Only creation events earn a message-ref write-back on the order
    pub fn is_creation(&self) -> bool {
        matches!(self, OrderNotification::OrderCreated { .. })
    }
}

/// Channel delivery errors
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Channel rejected notification: status {0}")]
    Rejected(u16),
}

/// Where notifications go
///
/// Returns the channel's opaque handle for the mirrored message, if it
/// issues one; the worker writes it back onto the order.
#[async_trait]
pub trait OperatorChannel: Send + Sync {
    async fn deliver(
        &self,
        notification: &OrderNotification,
    ) -> Result<Option<String>, NotifyError>;
}
