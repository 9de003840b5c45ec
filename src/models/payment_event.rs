//! Payment event model.
//!
//! A payment event is this system's record of one gateway transaction. It is
//! created on the first notification for a `transaction_id`, updated in place
//! by every later notification or status poll, and never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UnknownVariant;

/// Internal three-valued payment status.
///
/// Derived from the gateway's `transaction_status`; never set directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Pending,
    Unpaid,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Paid => "paid",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Unpaid => "unpaid",
        }
    }

    /// Position in the forward-only lifecycle `Pending < Unpaid < Paid`.
    ///
    /// A notification ranking below the stored status is stale.
    pub fn rank(self) -> u8 {
        match self {
            PaymentStatus::Pending => 0,
            PaymentStatus::Unpaid => 1,
            PaymentStatus::Paid => 2,
        }
    }
}

impl TryFrom<String> for PaymentStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "paid" => Ok(PaymentStatus::Paid),
            "pending" => Ok(PaymentStatus::Pending),
            "unpaid" => Ok(PaymentStatus::Unpaid),
            _ => Err(UnknownVariant::new("payment status", value)),
        }
    }
}

/// Represents a payment event record from the database.
///
/// # Database Table
///
/// Maps to the `payment_events` table. `transaction_id` is UNIQUE: redelivery
/// of the same transaction updates this row instead of inserting another.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct PaymentEvent {
    pub id: Uuid,

    /// Gateway-assigned id, the idempotency key
    pub transaction_id: String,

    /// Correlates the event to an invoice or a credit purchase attempt
    pub order_id: String,

    /// Gateway status vocabulary, canonicalized (`settlement` is stored as `settle`)
    pub raw_status: String,

    #[sqlx(try_from = "String")]
    pub payment_status: PaymentStatus,

    /// Gateway payment channel (`bank_transfer`, `qris`, `gopay`, ...)
    pub payment_type: Option<String>,

    /// Owning team. `None` when it could not be resolved.
    pub team: Option<String>,

    /// Linked invoice, once one exists
    pub invoice_id: Option<Uuid>,

    /// Gross amount in minor units
    pub amount: i64,

    pub currency: String,

    /// Latest applied notification body, verbatim
    pub payload: serde_json::Value,

    /// Set when the team could not be resolved; needs manual reconciliation.
    pub needs_review: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields written by an upsert.
///
/// On conflict, status, payment type, amount and payload are overwritten;
/// `team` and `invoice_id` keep any value already resolved.
#[derive(Debug, Clone)]
pub struct EventFields {
    pub transaction_id: String,
    pub order_id: String,
    pub raw_status: String,
    pub payment_status: PaymentStatus,
    pub payment_type: Option<String>,
    pub team: Option<String>,
    pub invoice_id: Option<Uuid>,
    pub amount: i64,
    pub currency: String,
    pub payload: serde_json::Value,
}

/// What an upsert did.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    /// The event as stored after the upsert
    pub event: PaymentEvent,

    /// Normalized status before the upsert, `None` if the event is new
    pub previous_status: Option<PaymentStatus>,

    /// `false` when the incoming status ranked below the stored one and the
    /// row was left as it was. `event` is then the stored row.
    pub applied: bool,
}

impl UpsertOutcome {
    pub fn is_new(&self) -> bool {
        self.previous_status.is_none()
    }
}

/// Response body for `GET /api/v1/payments/{transaction_id}`.
#[derive(Debug, Serialize)]
pub struct PaymentEventResponse {
    pub transaction_id: String,
    pub order_id: String,
    pub raw_status: String,
    pub payment_status: PaymentStatus,
    pub payment_type: Option<String>,
    pub invoice_id: Option<Uuid>,
    pub amount: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Drops the raw payload and internal review flag.
impl From<PaymentEvent> for PaymentEventResponse {
    fn from(event: PaymentEvent) -> Self {
        Self {
            transaction_id: event.transaction_id,
            order_id: event.order_id,
            raw_status: event.raw_status,
            payment_status: event.payment_status,
            payment_type: event.payment_type,
            invoice_id: event.invoice_id,
            amount: event.amount,
            currency: event.currency,
            created_at: event.created_at,
            updated_at: event.updated_at,
        }
    }
}
