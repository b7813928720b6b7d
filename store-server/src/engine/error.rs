//! Engine errors
//!
//! Validation and concurrency errors are rejected before any mutation and
//! surfaced to the caller verbatim; storage errors abort the whole command.
//! Integrity errors are fatal for the affected customer and halt their
//! activation sweeps.

use super::storage::StorageError;
use shared::order::OrderStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Out of stock: {product_id} (requested {requested}, available {available})")]
    OutOfStock {
        product_id: String,
        requested: u32,
        available: u32,
    },

    #[error("Insufficient bonus balance: requested {requested}, active {available}")]
    InsufficientBonusBalance { requested: i64, available: i64 },

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Concurrent modification: expected status {expected}, found {actual}")]
    ConcurrentModification {
        expected: OrderStatus,
        actual: OrderStatus,
    },

    #[error("Over-return: {product_id} (requested {requested}, returnable {returnable})")]
    OverReturn {
        product_id: String,
        requested: u32,
        returnable: u32,
    },

    #[error("Return not allowed: {0}")]
    ReturnNotAllowed(String),

    #[error("Ledger divergence for customer {customer_id}: cached ({cached_active}, {cached_pending}) != folded ({folded_active}, {folded_pending})")]
    LedgerDivergence {
        customer_id: String,
        cached_active: i64,
        cached_pending: i64,
        folded_active: i64,
        folded_pending: i64,
    },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
