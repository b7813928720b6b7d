//! Unified error handling
//!
//! Application-level error type and response envelope:
//! - [`AppError`] - HTTP-facing error enum
//! - [`AppResponse`] - API response structure
//!
//! # Error codes
//!
//! | Prefix | Category | Example |
//! |--------|----------|---------|
//! | E0xxx | Request / business errors | E0003 not found |
//! | E9xxx | System errors | E9002 storage error |
//!
//! # Usage
//!
//! ```ignore
//! // Error response
//! Err(AppError::NotFound("Order not found".to_string()))
//!
//! // Success response
//! Ok(ok(data))
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::engine::{CoalesceError, EngineError};

/// Unified API response envelope
///
/// ```json
/// {
///   "code": "E0000",
///   "message": "Success",
///   "data": { ... }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct AppResponse<T> {
    /// Error code (E0000 means success)
    pub code: String,
    /// Message
    pub message: String,
    /// Response payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// Application error enum
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ========== Request errors (4xx) ==========
    #[error("Resource not found: {0}")]
    /// Missing resource (404)
    NotFound(String),

    #[error("Conflict: {0}")]
    /// State moved under the caller (409)
    Conflict(String),

    #[error("Validation failed: {0}")]
    /// Malformed request (400)
    Validation(String),

    #[error("Business rule violation: {0}")]
    /// Well-formed but not allowed (422)
    BusinessRule(String),

    // ========== System errors (5xx) ==========
    #[error("Storage error: {0}")]
    /// Storage failure (500)
    Storage(String),

    #[error("Internal server error: {0}")]
    /// Everything else (500)
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "E0003", msg.as_str()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "E0004", msg.as_str()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "E0002", msg.as_str()),
            AppError::BusinessRule(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "E0005", msg.as_str())
            }
            AppError::Storage(msg) => {
                error!(target: "storage", error = %msg, "Storage error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, "E9002", "Storage error")
            }
            AppError::Internal(msg) => {
                error!(target: "internal", error = %msg, "Internal error occurred");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "E9001",
                    "Internal server error",
                )
            }
        };

        let body = Json(AppResponse::<()> {
            code: code.to_string(),
            message: message.to_string(),
            data: None,
        });

        (status, body).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::OrderNotFound(_) | EngineError::ProductNotFound(_) => {
                AppError::NotFound(e.to_string())
            }
            EngineError::EmptyCart | EngineError::InvalidOperation(_) => {
                AppError::Validation(e.to_string())
            }
            EngineError::OutOfStock { .. }
            | EngineError::InsufficientBonusBalance { .. }
            | EngineError::InvalidTransition { .. }
            | EngineError::OverReturn { .. }
            | EngineError::ReturnNotAllowed(_) => AppError::BusinessRule(e.to_string()),
            EngineError::ConcurrentModification { .. } => AppError::Conflict(e.to_string()),
            EngineError::Storage(inner) => AppError::Storage(inner.to_string()),
            EngineError::LedgerDivergence { .. } => AppError::Internal(e.to_string()),
        }
    }
}

impl From<CoalesceError> for AppError {
    fn from(e: CoalesceError) -> Self {
        match e {
            CoalesceError::Timeout(_) => AppError::Internal(e.to_string()),
            // The shared failure already went through From<EngineError> on
            // the leader's side; followers get the stringified form.
            CoalesceError::Failed(msg) => AppError::Internal(msg),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

// ========== Helper functions ==========

/// Create a successful response
pub fn ok<T: Serialize>(data: T) -> Json<AppResponse<T>> {
    Json(AppResponse {
        code: "E0000".to_string(),
        message: "Success".to_string(),
        data: Some(data),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::order::OrderStatus;

    #[test]
    fn engine_errors_map_to_expected_status() {
        let cases: Vec<(AppError, StatusCode)> = vec![
            (
                EngineError::OrderNotFound("x".into()).into(),
                StatusCode::NOT_FOUND,
            ),
            (EngineError::EmptyCart.into(), StatusCode::BAD_REQUEST),
            (
                EngineError::InsufficientBonusBalance {
                    requested: 10,
                    available: 2,
                }
                .into(),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                EngineError::ConcurrentModification {
                    expected: OrderStatus::New,
                    actual: OrderStatus::Confirmed,
                }
                .into(),
                StatusCode::CONFLICT,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn success_envelope_carries_e0000() {
        let response = ok(5u32);
        assert_eq!(response.0.code, "E0000");
        assert_eq!(response.0.data, Some(5));
    }
}
