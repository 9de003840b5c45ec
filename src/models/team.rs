//! Team data model and balance response types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::ledger::LedgerTransaction;

/// A team owning a prepaid balance.
///
/// # Database Table
///
/// Maps to the `teams` table. The `name` is the identifier embedded in credit
/// purchase order ids (`CREDITS-{name}-{timestamp}`).
///
/// # Balance Storage
///
/// Balances are stored as `i64` minor units of `currency` (rupiah for IDR,
/// cents for USD) to avoid floating-point precision issues.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Team {
    pub name: String,

    /// Current balance in minor units. Must be >= 0 (CHECK constraint).
    pub balance: i64,

    pub currency: String,

    pub created_at: DateTime<Utc>,

    /// Timestamp of the last balance change
    pub updated_at: DateTime<Utc>,
}

/// Response body for `GET /api/v1/balance`.
///
/// ```json
/// {
///   "team": "alice",
///   "balance": 50000,
///   "currency": "IDR",
///   "transactions": [ ... ]
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub team: String,
    pub balance: i64,
    pub currency: String,
    pub transactions: Vec<LedgerTransaction>,
}
