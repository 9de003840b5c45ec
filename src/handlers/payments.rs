//! Payment event HTTP handlers.
//!
//! - GET /api/v1/payments/{transaction_id} - Stored payment event
//! - POST /api/v1/payments/{transaction_id}/check - Refresh from the gateway

use axum::{
    Extension, Json,
    extract::{Path, State},
};

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::payment_event::PaymentEventResponse,
    services::{payment_service, reconciliation::ReconcileReport},
    state::AppState,
};

/// Get a payment event of the caller's team.
///
/// # Response (200)
///
/// ```json
/// {
///   "transaction_id": "9aed5972-...",
///   "order_id": "CREDITS-alice-20250101120000",
///   "raw_status": "settle",
///   "payment_status": "paid",
///   "payment_type": "bank_transfer",
///   "invoice_id": "550e8400-...",
///   "amount": 50000,
///   "currency": "IDR",
///   "created_at": "2025-01-01T12:00:00Z",
///   "updated_at": "2025-01-01T12:05:00Z"
/// }
/// ```
pub async fn get_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(transaction_id): Path<String>,
) -> Result<Json<PaymentEventResponse>, AppError> {
    let event = payment_service::get_payment(&state, &auth.team, &transaction_id).await?;
    Ok(Json(event))
}

/// Ask the gateway for the current status and reconcile it.
///
/// # Response (200)
///
/// ```json
/// {
///   "transaction_id": "9aed5972-...",
///   "previous_status": "pending",
///   "status": "paid",
///   "transition": "transitioned_to_paid",
///   "team": "alice",
///   "invoice_id": "550e8400-...",
///   "effects": [
///     { "kind": "credited", "ledger_transaction_id": "770e8400-...", "amount": 50000 },
///     { "kind": "invoice_paid", "invoice_id": "550e8400-..." }
///   ]
/// }
/// ```
///
/// # Errors
///
/// - 404 if the transaction is not the caller's
/// - 502 with `gateway_messages` if the gateway fails; nothing is changed
pub async fn check_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(transaction_id): Path<String>,
) -> Result<Json<ReconcileReport>, AppError> {
    let report = payment_service::check_status(&state, &auth.team, &transaction_id).await?;
    Ok(Json(report))
}
