//! Checkout endpoint
//!
//! | Path | Method |
//! |------|--------|
//! | /api/checkout | POST |

use axum::{Json, Router, extract::State, routing::post};
use validator::Validate;

use super::AppResult;
use crate::core::ServerState;
use crate::engine::{CheckoutOutcome, CheckoutRequest};
use crate::utils::{ok, AppResponse};

pub fn router() -> Router<ServerState> {
    Router::new().route("/api/checkout", post(checkout))
}

/// Create an order from a cart.
///
/// Replaying the same `idempotency_key` returns the original outcome
/// without charging, decrementing stock, or awarding points twice.
async fn checkout(
    State(state): State<ServerState>,
    Json(payload): Json<CheckoutRequest>,
) -> AppResult<Json<AppResponse<CheckoutOutcome>>> {
    payload.validate()?;
    let outcome = state.engine.checkout(&payload)?;
    Ok(ok(outcome))
}
