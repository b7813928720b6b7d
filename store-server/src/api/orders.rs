//! Order routes
//!
//! | Path | Method |
//! |------|--------|
//! | /api/orders/{id} | GET |
//! | /api/orders/{id}/transition | POST |
//! | /api/orders/{id}/returns | POST |
//! | /api/orders/{id}/returns | GET |

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use validator::Validate;

use super::AppResult;
use crate::core::ServerState;
use crate::engine::{ReturnOutcome, ReturnRequest, TransitionOutcome, TransitionRequest};
use crate::utils::{ok, AppResponse};
use shared::order::{Order, OrderReturn};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/orders/{id}", get(get_order))
        .route("/api/orders/{id}/transition", post(transition))
        .route(
            "/api/orders/{id}/returns",
            post(create_return).get(list_returns),
        )
}

async fn get_order(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<AppResponse<Order>>> {
    Ok(ok(state.engine.get_order(&id)?))
}

/// Move an order along the state machine.
///
/// `expected_status` makes the request a compare-and-set: a 409 means the
/// order moved since the caller last read it.
async fn transition(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(payload): Json<TransitionRequest>,
) -> AppResult<Json<AppResponse<TransitionOutcome>>> {
    payload.validate()?;
    let outcome = state.engine.transition(&id, &payload)?;
    Ok(ok(outcome))
}

/// Register a (possibly partial) return against a delivered order
async fn create_return(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(payload): Json<ReturnRequest>,
) -> AppResult<Json<AppResponse<ReturnOutcome>>> {
    payload.validate()?;
    let outcome = state.engine.process_return(&id, &payload)?;
    Ok(ok(outcome))
}

async fn list_returns(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<AppResponse<Vec<OrderReturn>>>> {
    Ok(ok(state.engine.order_returns(&id)?))
}
