//! API error mapping
//!
//! Business outcomes never reach this module; only engine errors do. The
//! mapping follows one rule: provider transients are retryable 5xx, bad
//! input is 4xx, and broken configuration is 500. Raw provider payloads are
//! never echoed to the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use pressroom_billing::BillingError;

/// Error returned by API handlers.
pub struct ApiError(pub BillingError);

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            BillingError::Configuration(_) => {
                tracing::error!(error = %self.0, "Configuration error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            }
            BillingError::NotFound { what, .. } => {
                (StatusCode::NOT_FOUND, format!("{what} not found"))
            }
            BillingError::Validation(message) => (StatusCode::BAD_REQUEST, message.clone()),
            BillingError::ProviderTransient(_) => {
                tracing::warn!(error = %self.0, "Provider transient failure");
                (
                    StatusCode::BAD_GATEWAY,
                    "Payment provider unavailable, please try again".to_string(),
                )
            }
            BillingError::Database(_) => {
                tracing::error!(error = %self.0, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            }
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
