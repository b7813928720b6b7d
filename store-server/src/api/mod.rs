//! API routes
//!
//! # Structure
//!
//! - [`health`] - health check
//! - [`checkout`] - checkout endpoint
//! - [`orders`] - order queries, transitions, returns
//! - [`ledger`] - customer ledger and balance queries
//! - [`products`] - catalog management
//! - [`operator`] - operator command side channel

pub mod checkout;
pub mod health;
pub mod ledger;
pub mod operator;
pub mod orders;
pub mod products;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::core::ServerState;

/// Result type for API handlers
pub type AppResult<T> = Result<T, crate::utils::AppError>;

/// Build the full application router
pub fn router(state: ServerState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(checkout::router())
        .merge(orders::router())
        .merge(ledger::router())
        .merge(products::router())
        .merge(operator::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
