//! Service-wide error type and its HTTP rendering.
//!
//! Every error leaves as
//!
//! ```json
//! { "error": { "code": "invalid_signature", "message": "..." } }
//! ```
//!
//! Gateway failures add `gateway_messages`, copied verbatim from the gateway
//! so the calling team can see why a charge or status check failed. Store
//! failures are logged and rendered without detail.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::gateway::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A non-database store backend failed (in-memory store, injected failure).
    #[error("Store error: {0}")]
    Store(String),

    /// Missing, unknown or revoked team API key. 401.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Body is not a valid notification. 400, nothing persisted.
    #[error("Malformed notification: {0}")]
    MalformedNotification(String),

    /// Signature mismatch, or absent while required. 401, nothing persisted.
    #[error("Invalid notification signature")]
    InvalidSignature,

    /// Unknown to the caller's team, whether or not it exists. 404.
    #[error("Transaction not found")]
    TransactionNotFound,

    /// 400 with the validation message.
    #[error("Invalid request")]
    InvalidRequest(String),

    /// 502. Nothing changed; the caller may retry.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidApiKey | AppError::InvalidSignature => StatusCode::UNAUTHORIZED,
            AppError::MalformedNotification(_) | AppError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::TransactionNotFound => StatusCode::NOT_FOUND,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::InvalidApiKey => "invalid_api_key",
            AppError::InvalidSignature => "invalid_signature",
            AppError::MalformedNotification(_) => "malformed_notification",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::TransactionNotFound => "transaction_not_found",
            AppError::Gateway(_) => "gateway_error",
            AppError::Database(_) | AppError::Store(_) => "internal_error",
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::MalformedNotification(msg) | AppError::InvalidRequest(msg) => msg.clone(),
            AppError::Database(_) | AppError::Store(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "code": self.code(),
            "message": self.message(),
        });

        match &self {
            AppError::Gateway(err) => {
                error["gateway_messages"] = json!(err.messages());
            }
            AppError::Database(_) | AppError::Store(_) => {
                tracing::error!(error = %self, "store failure");
            }
            _ => {}
        }

        (self.status(), Json(json!({ "error": error }))).into_response()
    }
}
