//! Inbound payment gateway notifications.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use serde_json::{Value, json};

use crate::error::AppError;
use crate::services::webhook_service::{self, SIGNATURE_HEADER};
use crate::state::AppState;

/// Receive a Midtrans notification.
///
/// Public route; the notification signature is the only authentication.
///
/// # Response
///
/// `200 {"status": "success"}` once the delivery is recorded, whether or
/// not reconciliation succeeded. 400 for unparsable bodies and 401 for
/// signature failures, in which case nothing is stored.
pub async fn midtrans_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());

    webhook_service::ingest(&state, signature, &body).await?;

    Ok(Json(json!({ "status": "success" })))
}
