//! Read-only billing views for the caller's team.
//!
//! - GET /api/v1/invoices - Invoices with line items
//! - GET /api/v1/balance - Balance and ledger transactions

use axum::{Extension, Json, extract::State};

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{invoice::InvoiceResponse, team::BalanceResponse},
    state::AppState,
};

/// List the team's invoices, newest first.
pub async fn list_invoices(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<InvoiceResponse>>, AppError> {
    let invoices = state.store.list_invoices(&auth.team).await?;

    let mut response = Vec::with_capacity(invoices.len());
    for invoice in invoices {
        let items = state.store.invoice_items(invoice.id).await?;
        response.push(InvoiceResponse { invoice, items });
    }

    Ok(Json(response))
}

/// Current balance and every credit that built it.
///
/// # Response (200)
///
/// ```json
/// {
///   "team": "alice",
///   "balance": 50000,
///   "currency": "IDR",
///   "transactions": [
///     {
///       "id": "770e8400-...",
///       "team": "alice",
///       "amount": 50000,
///       "currency": "IDR",
///       "reference": "9aed5972-...",
///       "source": "prepaid_credits",
///       "invoice_id": "550e8400-...",
///       "created_at": "2025-01-01T12:05:00Z"
///     }
///   ]
/// }
/// ```
pub async fn get_balance(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<BalanceResponse>, AppError> {
    let team = state
        .store
        .find_team(&auth.team)
        .await?
        .ok_or_else(|| AppError::Store(format!("team {} has a key but no record", auth.team)))?;
    let transactions = state.store.list_ledger(&team.name).await?;

    Ok(Json(BalanceResponse {
        team: team.name,
        balance: team.balance,
        currency: team.currency,
        transactions,
    }))
}
