//! Invoice models.
//!
//! Invoices are referenced, not owned, by the reconciliation engine: it creates
//! pending credit-purchase invoices, marks them paid, and voids superseded ones.
//!
//! # Lifecycle
//!
//! Invoices move forward only: `Unpaid -> Paid` or `Unpaid -> Empty`.
//! At most one credit-purchase invoice per team is `Unpaid` at any time
//! (partial unique index `invoices_one_unpaid_credit_purchase`).

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::UnknownVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Unpaid,
    Paid,
    /// Voided: superseded by a newer purchase or cancelled by a sibling payment.
    Empty,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Unpaid => "unpaid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Empty => "empty",
        }
    }
}

impl TryFrom<String> for InvoiceStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "draft" => Ok(InvoiceStatus::Draft),
            "unpaid" => Ok(InvoiceStatus::Unpaid),
            "paid" => Ok(InvoiceStatus::Paid),
            "empty" => Ok(InvoiceStatus::Empty),
            _ => Err(UnknownVariant::new("invoice status", value)),
        }
    }
}

/// Why an invoice exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoicePurpose {
    /// Attempt to buy prepaid balance. Paying it credits the team.
    CreditPurchase,
    /// Regular subscription invoice. Paying it credits nothing.
    Subscription,
}

impl InvoicePurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoicePurpose::CreditPurchase => "credit_purchase",
            InvoicePurpose::Subscription => "subscription",
        }
    }
}

impl TryFrom<String> for InvoicePurpose {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "credit_purchase" => Ok(InvoicePurpose::CreditPurchase),
            "subscription" => Ok(InvoicePurpose::Subscription),
            _ => Err(UnknownVariant::new("invoice purpose", value)),
        }
    }
}

/// Represents an invoice record from the database.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct Invoice {
    pub id: Uuid,
    pub team: String,

    /// Gateway order id this invoice is paid through, if any
    pub order_id: Option<String>,

    #[sqlx(try_from = "String")]
    pub purpose: InvoicePurpose,

    #[sqlx(try_from = "String")]
    pub status: InvoiceStatus,

    /// Total in minor units
    pub amount: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// What an invoice line item points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// A payment event, by gateway transaction id (while the purchase is pending)
    PaymentEvent,
    /// A ledger transaction, by id (once the purchase is credited)
    LedgerTransaction,
}

impl ReferenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferenceKind::PaymentEvent => "payment_event",
            ReferenceKind::LedgerTransaction => "ledger_transaction",
        }
    }
}

impl TryFrom<String> for ReferenceKind {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "payment_event" => Ok(ReferenceKind::PaymentEvent),
            "ledger_transaction" => Ok(ReferenceKind::LedgerTransaction),
            _ => Err(UnknownVariant::new("reference kind", value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct InvoiceItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub amount: i64,
    #[sqlx(try_from = "String")]
    pub reference_kind: ReferenceKind,
    pub reference_id: String,
}

/// A pending credit-purchase invoice to create, with its single line item
/// pointing at the payment event that opened it.
#[derive(Debug, Clone)]
pub struct NewPendingInvoice {
    pub team: String,
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
    pub transaction_id: String,
}

/// Invoice plus its line items, as returned by `GET /api/v1/invoices`.
#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
}
