//! Credit purchase initiation.

use axum::{Extension, Json, extract::State, http::StatusCode};

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::purchase::{PurchaseRequest, PurchaseResponse},
    services::payment_service,
    state::AppState,
};

/// Start buying prepaid credits.
///
/// # Request Body
///
/// ```json
/// {
///   "amount": "50000",
///   "currency": "IDR",
///   "method": { "type": "bank_transfer", "bank": "bca" }
/// }
/// ```
///
/// `method` is one of `{"type": "bank_transfer", "bank": ...}`,
/// `{"type": "ewallet", "channel": "gopay" | "shopeepay"}` or
/// `{"type": "qris"}`.
///
/// # Response (201)
///
/// ```json
/// {
///   "order_id": "CREDITS-alice-20250101120000",
///   "amount": 50000,
///   "currency": "IDR",
///   "charge": {
///     "transaction_id": "9aed5972-...",
///     "transaction_status": "pending",
///     "va_numbers": [{ "bank": "bca", "va_number": "12345678901" }],
///     "actions": [],
///     "expiry_time": "2025-01-02 12:00:00"
///   }
/// }
/// ```
pub async fn create_purchase(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<PurchaseResponse>), AppError> {
    let purchase = payment_service::start_purchase(&state, &auth.team, request).await?;
    Ok((StatusCode::CREATED, Json(purchase)))
}
