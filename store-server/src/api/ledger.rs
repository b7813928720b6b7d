//! Customer ledger routes
//!
//! | Path | Method |
//! |------|--------|
//! | /api/customers/{id}/ledger | GET |
//! | /api/customers/{id}/balance | GET |

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use serde::Deserialize;

use super::AppResult;
use crate::core::ServerState;
use crate::utils::{ok, AppResponse};
use shared::ledger::{BonusBalance, LedgerEntry};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/customers/{id}/ledger", get(ledger_page))
        .route("/api/customers/{id}/balance", get(balance))
}

/// Query params for the ledger page
#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    /// Exclusive upper bound for cursor pagination (newest first)
    #[serde(default)]
    pub before_seq: Option<u64>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// One page of ledger entries, newest first
async fn ledger_page(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Query(query): Query<LedgerQuery>,
) -> AppResult<Json<AppResponse<Vec<LedgerEntry>>>> {
    let limit = query.limit.min(200);
    let entries = state.engine.ledger_page(&id, query.before_seq, limit)?;
    Ok(ok(entries))
}

/// Current balances; concurrent lookups for the same customer coalesce
/// onto one storage read.
async fn balance(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<AppResponse<BonusBalance>>> {
    let engine = state.engine.clone();
    let key = format!("balance/{id}");
    let balance = state
        .balance_reads
        .run(&key, async move { engine.balance(&id) })
        .await?;
    Ok(ok(balance))
}
