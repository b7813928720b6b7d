//! Shared domain types for the store server
//!
//! This crate holds the types that cross process boundaries:
//!
//! - **order**: orders, order items, status machine vocabulary, returns
//! - **ledger**: bonus-point ledger entries and cached balances
//! - **util**: timestamp and ID helpers

pub mod ledger;
pub mod order;
pub mod util;

// Re-export common types
pub use ledger::{BonusBalance, LedgerEntry, LedgerEntryKind};
pub use order::{
    Actor, CancelledBy, DeliveryMethod, GuestContact, Order, OrderItem, OrderReturn, OrderStatus,
    PaymentMethod, ReturnItem,
};
pub use util::{new_entity_id, now_millis};
