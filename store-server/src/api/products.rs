//! Catalog routes
//!
//! | Path | Method |
//! |------|--------|
//! | /api/products | POST |
//! | /api/products/{id} | GET |

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::AppResult;
use crate::core::ServerState;
use crate::engine::Product;
use crate::utils::{ok, AppError, AppResponse};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/products", post(upsert_product))
        .route("/api/products/{id}", get(get_product))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpsertProductRequest {
    #[validate(length(min = 1, max = 64))]
    pub product_id: String,
    #[validate(length(min = 1, max = 256))]
    pub name: String,
    pub price: Decimal,
    /// Bonus points awarded per unit purchased
    #[serde(default)]
    pub bonus_award_rate: i64,
    pub stock: u32,
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    #[serde(flatten)]
    pub product: Product,
    pub stock: u32,
}

/// Create or replace a catalog entry and its stock level
async fn upsert_product(
    State(state): State<ServerState>,
    Json(payload): Json<UpsertProductRequest>,
) -> AppResult<Json<AppResponse<ProductResponse>>> {
    payload.validate()?;
    if payload.price < Decimal::ZERO {
        return Err(AppError::Validation("price must be non-negative".to_string()));
    }
    if payload.bonus_award_rate < 0 {
        return Err(AppError::Validation(
            "bonus_award_rate must be non-negative".to_string(),
        ));
    }
    let product = Product {
        product_id: payload.product_id,
        name: payload.name,
        price: payload.price,
        bonus_award_rate: payload.bonus_award_rate,
    };
    state.engine.upsert_product(&product, payload.stock)?;
    Ok(ok(ProductResponse {
        product,
        stock: payload.stock,
    }))
}

async fn get_product(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<AppResponse<ProductResponse>>> {
    let (product, stock) = state.engine.get_product(&id)?;
    Ok(ok(ProductResponse { product, stock }))
}
