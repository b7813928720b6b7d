//! Operator command side channel
//!
//! The admin console (or a chat bridge in front of it) posts commands
//! here. Order transitions issued this way run through the same engine
//! pipeline as customer requests - same idempotency keys, same state
//! machine, same ledger rules.
//!
//! | Path | Method |
//! |------|--------|
//! | /api/operator/commands | POST |

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use shared::order::{Actor, OrderStatus};

use super::AppResult;
use crate::core::ServerState;
use crate::engine::{TransitionOutcome, TransitionRequest};
use crate::utils::{ok, AppError, AppResponse};

pub fn router() -> Router<ServerState> {
    Router::new().route("/api/operator/commands", post(execute))
}

/// Commands an operator may issue
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatorCommand {
    /// Move an order along the state machine on the customer's behalf
    Transition {
        order_id: String,
        idempotency_key: String,
        target: OrderStatus,
        #[serde(default)]
        expected_status: Option<OrderStatus>,
    },
    /// Run the activation sweep immediately instead of waiting for the tick
    RunActivationSweep,
    /// Replay every ledger against its cached balance
    Reconcile,
}

#[derive(Debug, Deserialize)]
pub struct OperatorCommandRequest {
    pub operator_id: String,
    #[serde(flatten)]
    pub command: OperatorCommand,
}

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatorCommandResponse {
    Transitioned(TransitionOutcome),
    SweepCompleted { activated: usize },
    ReconcileCompleted { divergent_customers: Vec<String> },
}

async fn execute(
    State(state): State<ServerState>,
    Json(payload): Json<OperatorCommandRequest>,
) -> AppResult<Json<AppResponse<OperatorCommandResponse>>> {
    if payload.operator_id.is_empty() {
        return Err(AppError::Validation("operator_id is required".to_string()));
    }
    let response = match payload.command {
        OperatorCommand::Transition {
            order_id,
            idempotency_key,
            target,
            expected_status,
        } => {
            let request = TransitionRequest {
                idempotency_key,
                target,
                expected_status,
                actor: Actor::Operator(payload.operator_id),
            };
            let outcome = state.engine.transition(&order_id, &request)?;
            OperatorCommandResponse::Transitioned(outcome)
        }
        OperatorCommand::RunActivationSweep => {
            let activated = state.engine.run_activation_sweep()?;
            OperatorCommandResponse::SweepCompleted { activated }
        }
        OperatorCommand::Reconcile => {
            let divergent_customers = state.engine.reconcile_all()?;
            OperatorCommandResponse::ReconcileCompleted {
                divergent_customers,
            }
        }
    };
    Ok(ok(response))
}
