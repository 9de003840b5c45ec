//! Persistence seam.
//!
//! The reconciliation engine never talks to a database directly. It opens a
//! [`StoreTx`] through [`PaymentStore::begin`], takes the per-transaction and
//! per-team locks, applies every effect of one notification, then commits.
//! Dropping a `StoreTx` without committing rolls everything back.
//!
//! Two backends exist: [`postgres::PgStore`] for production and
//! [`memory::MemoryStore`] for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    api_key::ApiKey,
    invoice::{Invoice, InvoiceItem, NewPendingInvoice},
    ledger::{CreditOutcome, LedgerTransaction, NewCredit},
    payment_event::{EventFields, PaymentEvent, UpsertOutcome},
    team::Team,
    webhook_delivery::{DeliveryOutcome, NewDelivery, WebhookDelivery},
};

pub mod memory;
pub mod postgres;

/// Shared, non-transactional access to the store.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Open a unit of work. Nothing it writes is visible until `commit`.
    ///
    /// # Returns
    ///
    /// A boxed [`StoreTx`] holding one connection (Postgres) or the store
    /// mutex (memory) until it is committed or dropped.
    ///
    /// # Errors
    ///
    /// The backend could not start a transaction, e.g. the pool timed out.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError>;

    /// Cheap liveness check used by `/health`.
    async fn ping(&self) -> Result<(), AppError>;

    async fn find_event(&self, transaction_id: &str) -> Result<Option<PaymentEvent>, AppError>;

    /// Active key by SHA-256 hash.
    async fn find_api_key(&self, key_hash: &str) -> Result<Option<ApiKey>, AppError>;

    async fn find_team(&self, name: &str) -> Result<Option<Team>, AppError>;

    async fn find_invoice_by_order(&self, order_id: &str) -> Result<Option<Invoice>, AppError>;

    /// Team's invoices, newest first.
    async fn list_invoices(&self, team: &str) -> Result<Vec<Invoice>, AppError>;

    async fn invoice_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError>;

    /// Team's ledger transactions, newest first.
    async fn list_ledger(&self, team: &str) -> Result<Vec<LedgerTransaction>, AppError>;

    /// Append a delivery with outcome `received` and zero attempts.
    ///
    /// Called before reconciliation so a crash mid-pass still leaves a row
    /// the retry worker can find.
    async fn record_delivery(&self, delivery: NewDelivery) -> Result<WebhookDelivery, AppError>;

    /// Overwrite outcome, attempt count and last error of one delivery.
    async fn update_delivery(
        &self,
        id: Uuid,
        outcome: DeliveryOutcome,
        attempts: i32,
        last_error: Option<String>,
    ) -> Result<(), AppError>;

    /// Deliveries the retry worker should replay, oldest first.
    ///
    /// # Arguments
    ///
    /// * `limit` - Maximum number of rows returned
    /// * `received_before` - `received` rows recorded at or before this
    ///   instant are included; their pass never finished
    ///
    /// # Returns
    ///
    /// Every `deferred` row plus the abandoned `received` rows, ordered by
    /// `updated_at`.
    async fn due_deliveries(
        &self,
        limit: i64,
        received_before: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>, AppError>;
}

/// One reconciliation's unit of work.
///
/// Lock order is always transaction id first, then team.
#[async_trait]
pub trait StoreTx: Send {
    /// Serialize all work on one gateway transaction id until commit.
    async fn lock_transaction(&mut self, transaction_id: &str) -> Result<(), AppError>;

    /// Serialize all per-team side effects until commit.
    async fn lock_team(&mut self, team: &str) -> Result<(), AppError>;

    async fn find_event(&mut self, transaction_id: &str) -> Result<Option<PaymentEvent>, AppError>;

    async fn team_exists(&mut self, team: &str) -> Result<bool, AppError>;

    async fn find_invoice_by_order(&mut self, order_id: &str) -> Result<Option<Invoice>, AppError>;

    async fn find_invoice(&mut self, id: Uuid) -> Result<Option<Invoice>, AppError>;

    /// Insert or update the event keyed by `transaction_id`, reporting the
    /// normalized status it had before.
    ///
    /// Status, payment type, amount and payload are overwritten. `team` and
    /// `invoice_id` are only filled when still empty.
    ///
    /// The rank comparison happens here, under the row lock: an incoming
    /// status ranked below the stored one writes nothing and comes back with
    /// `applied = false`. A sibling cancellation committed by another pass
    /// after this pass first read the event is therefore never undone.
    ///
    /// # Errors
    ///
    /// Store failure. The caller must drop the unit of work.
    async fn upsert_event(&mut self, fields: EventFields) -> Result<UpsertOutcome, AppError>;

    async fn link_invoice(&mut self, transaction_id: &str, invoice_id: Uuid) -> Result<(), AppError>;

    /// Credit the team unless a ledger transaction with this reference
    /// already exists. The only guard against double crediting.
    ///
    /// # Returns
    ///
    /// [`CreditOutcome::Created`] with the new row, or
    /// [`CreditOutcome::AlreadyCredited`] with the row that already holds the
    /// reference. The balance only moves in the first case.
    async fn credit(&mut self, credit: NewCredit) -> Result<CreditOutcome, AppError>;

    /// Create an unpaid credit-purchase invoice whose single item references
    /// the payment event.
    async fn create_pending_invoice(&mut self, invoice: NewPendingInvoice) -> Result<Invoice, AppError>;

    /// `Unpaid -> Paid`. Returns false if the invoice was not unpaid.
    async fn mark_invoice_paid(&mut self, id: Uuid) -> Result<bool, AppError>;

    /// `Unpaid -> Empty`. Returns false if the invoice was not unpaid.
    async fn void_invoice(&mut self, id: Uuid) -> Result<bool, AppError>;

    /// Team's unpaid credit-purchase invoices.
    async fn unpaid_credit_purchases(&mut self, team: &str) -> Result<Vec<Invoice>, AppError>;

    /// Team's pending events that are credit purchases: unlinked, or linked
    /// to a credit-purchase invoice.
    async fn pending_credit_purchase_events(&mut self, team: &str) -> Result<Vec<PaymentEvent>, AppError>;

    /// Force a pending event to `cancel` / unpaid.
    async fn cancel_event(&mut self, transaction_id: &str) -> Result<(), AppError>;

    /// Point the invoice's payment-event items at the ledger transaction
    /// that settled it.
    async fn repoint_invoice_items(
        &mut self,
        invoice_id: Uuid,
        ledger_transaction_id: Uuid,
    ) -> Result<(), AppError>;

    /// Make every write of this unit visible and release its locks.
    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}
