//! Ledger transaction model.
//!
//! A ledger transaction is an immutable balance credit attributed to a team.
//! Its `reference` is the gateway transaction id that paid for it, and the
//! existence of a row with a given reference is what "already credited" means.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Source recorded on credits bought through the gateway.
pub const PREPAID_CREDITS_SOURCE: &str = "prepaid_credits";

/// Represents a ledger transaction record from the database.
///
/// # Database Table
///
/// Maps to the `ledger_transactions` table. `reference` is UNIQUE, so a
/// gateway transaction can be credited at most once.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct LedgerTransaction {
    pub id: Uuid,

    pub team: String,

    /// Amount credited in minor units. Always positive.
    pub amount: i64,

    pub currency: String,

    /// Gateway transaction id
    pub reference: String,

    pub source: String,

    /// Credit purchase invoice this credit settles, if any
    pub invoice_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
}

/// A credit to insert.
#[derive(Debug, Clone)]
pub struct NewCredit {
    pub team: String,
    pub amount: i64,
    pub currency: String,
    pub reference: String,
    pub invoice_id: Option<Uuid>,
}

/// Result of an idempotent credit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditOutcome {
    /// This call inserted the ledger row and raised the balance.
    Created(LedgerTransaction),
    /// A ledger row with this reference already existed; nothing changed.
    AlreadyCredited(LedgerTransaction),
}

impl CreditOutcome {
    pub fn transaction(&self) -> &LedgerTransaction {
        match self {
            CreditOutcome::Created(t) | CreditOutcome::AlreadyCredited(t) => t,
        }
    }
}
