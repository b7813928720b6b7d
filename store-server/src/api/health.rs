//! Health check route
//!
//! | Path | Method | Auth |
//! |------|--------|------|
//! | /api/health | GET | none |

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::core::ServerState;
use crate::utils::{ok, AppResponse};

pub fn router() -> Router<ServerState> {
    Router::new().route("/api/health", get(health))
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
    /// Customers frozen by a failed ledger integrity check
    halted_customers: Vec<String>,
}

async fn health(State(state): State<ServerState>) -> Json<AppResponse<HealthResponse>> {
    let halted_customers = state.engine.halted_customers();
    ok(HealthResponse {
        status: if halted_customers.is_empty() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.environment.clone(),
        halted_customers,
    })
}
