//! In-memory store for tests.
//!
//! Transactions are fully serialized: `begin` takes the store's one async
//! mutex and works on a copy of the data, which replaces the live data on
//! `commit`. Dropping the transaction discards the copy.
//!
//! Failure injection ([`MemoryStore::fail_next`]) makes the next matching
//! write inside a transaction return a store error, so tests can check that
//! a failed reconciliation leaves no partial effects.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    api_key::{ApiKey, hash_api_key},
    invoice::{Invoice, InvoiceItem, InvoicePurpose, InvoiceStatus, NewPendingInvoice, ReferenceKind},
    ledger::{CreditOutcome, LedgerTransaction, NewCredit, PREPAID_CREDITS_SOURCE},
    payment_event::{EventFields, PaymentEvent, PaymentStatus, UpsertOutcome},
    team::Team,
    webhook_delivery::{DeliveryOutcome, NewDelivery, WebhookDelivery},
};
use crate::store::{PaymentStore, StoreTx};

/// Write that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Credit,
    CreateInvoice,
    MarkInvoicePaid,
    VoidInvoice,
    UpsertEvent,
    /// Delivery log bookkeeping, outside any unit of work
    UpdateDelivery,
}

#[derive(Debug, Clone, Default)]
struct Data {
    teams: BTreeMap<String, Team>,
    api_keys: Vec<ApiKey>,
    events: BTreeMap<String, PaymentEvent>,
    invoices: BTreeMap<Uuid, Invoice>,
    items: Vec<InvoiceItem>,
    ledger: Vec<LedgerTransaction>,
    deliveries: Vec<WebhookDelivery>,
}

#[derive(Debug, Default)]
struct Shared {
    data: Data,
    failures: Vec<FailPoint>,
}

impl Shared {
    fn take_failure(&mut self, point: FailPoint) -> Result<(), AppError> {
        if let Some(pos) = self.failures.iter().position(|p| *p == point) {
            self.failures.remove(pos);
            return Err(AppError::Store(format!("injected failure at {point:?}")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_team(&self, name: &str, currency: &str) -> Team {
        let now = Utc::now();
        let team = Team {
            name: name.to_string(),
            balance: 0,
            currency: currency.to_string(),
            created_at: now,
            updated_at: now,
        };
        let mut shared = self.shared.lock().await;
        shared.data.teams.insert(team.name.clone(), team.clone());
        team
    }

    /// Register a raw API key for `team`, stored hashed.
    pub async fn insert_api_key(&self, team: &str, raw_key: &str) -> ApiKey {
        let key = ApiKey {
            id: Uuid::new_v4(),
            key_hash: hash_api_key(raw_key),
            team: team.to_string(),
            created_at: Utc::now(),
            is_active: true,
        };
        let mut shared = self.shared.lock().await;
        shared.data.api_keys.push(key.clone());
        key
    }

    /// Seed an unpaid invoice, e.g. a subscription invoice paid through the gateway.
    pub async fn insert_invoice(
        &self,
        team: &str,
        order_id: &str,
        purpose: InvoicePurpose,
        amount: i64,
        currency: &str,
    ) -> Invoice {
        let now = Utc::now();
        let invoice = Invoice {
            id: Uuid::new_v4(),
            team: team.to_string(),
            order_id: Some(order_id.to_string()),
            purpose,
            status: InvoiceStatus::Unpaid,
            amount,
            currency: currency.to_string(),
            created_at: now,
            updated_at: now,
            paid_at: None,
        };
        let mut shared = self.shared.lock().await;
        shared.data.invoices.insert(invoice.id, invoice.clone());
        invoice
    }

    /// Make the next transactional write at `point` fail.
    pub async fn fail_next(&self, point: FailPoint) {
        self.shared.lock().await.failures.push(point);
    }

    pub async fn events(&self) -> Vec<PaymentEvent> {
        self.shared.lock().await.data.events.values().cloned().collect()
    }

    pub async fn invoices(&self) -> Vec<Invoice> {
        self.shared.lock().await.data.invoices.values().cloned().collect()
    }

    pub async fn ledger(&self) -> Vec<LedgerTransaction> {
        self.shared.lock().await.data.ledger.clone()
    }

    pub async fn deliveries(&self) -> Vec<WebhookDelivery> {
        self.shared.lock().await.data.deliveries.clone()
    }

    pub async fn balance(&self, team: &str) -> Option<i64> {
        self.shared.lock().await.data.teams.get(team).map(|t| t.balance)
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<Shared>,
    work: Data,
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let guard = self.shared.clone().lock_owned().await;
        let work = guard.data.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn find_event(&self, transaction_id: &str) -> Result<Option<PaymentEvent>, AppError> {
        Ok(self.shared.lock().await.data.events.get(transaction_id).cloned())
    }

    async fn find_api_key(&self, key_hash: &str) -> Result<Option<ApiKey>, AppError> {
        let shared = self.shared.lock().await;
        Ok(shared
            .data
            .api_keys
            .iter()
            .find(|k| k.key_hash == key_hash && k.is_active)
            .cloned())
    }

    async fn find_team(&self, name: &str) -> Result<Option<Team>, AppError> {
        Ok(self.shared.lock().await.data.teams.get(name).cloned())
    }

    async fn find_invoice_by_order(&self, order_id: &str) -> Result<Option<Invoice>, AppError> {
        Ok(invoice_by_order(&self.shared.lock().await.data, order_id))
    }

    async fn list_invoices(&self, team: &str) -> Result<Vec<Invoice>, AppError> {
        let shared = self.shared.lock().await;
        let mut invoices: Vec<Invoice> = shared
            .data
            .invoices
            .values()
            .filter(|i| i.team == team)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invoices)
    }

    async fn invoice_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError> {
        let shared = self.shared.lock().await;
        Ok(shared
            .data
            .items
            .iter()
            .filter(|i| i.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn list_ledger(&self, team: &str) -> Result<Vec<LedgerTransaction>, AppError> {
        let shared = self.shared.lock().await;
        let mut entries: Vec<LedgerTransaction> = shared
            .data
            .ledger
            .iter()
            .filter(|t| t.team == team)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    async fn record_delivery(&self, delivery: NewDelivery) -> Result<WebhookDelivery, AppError> {
        let now = Utc::now();
        let row = WebhookDelivery {
            id: Uuid::new_v4(),
            transaction_id: delivery.transaction_id,
            order_id: delivery.order_id,
            raw_status: delivery.raw_status,
            signature_state: delivery.signature_state,
            payload: delivery.payload,
            outcome: DeliveryOutcome::Received,
            attempts: 0,
            last_error: None,
            received_at: now,
            updated_at: now,
        };
        self.shared.lock().await.data.deliveries.push(row.clone());
        Ok(row)
    }

    async fn update_delivery(
        &self,
        id: Uuid,
        outcome: DeliveryOutcome,
        attempts: i32,
        last_error: Option<String>,
    ) -> Result<(), AppError> {
        let mut shared = self.shared.lock().await;
        shared.take_failure(FailPoint::UpdateDelivery)?;
        if let Some(row) = shared.data.deliveries.iter_mut().find(|d| d.id == id) {
            row.outcome = outcome;
            row.attempts = attempts;
            row.last_error = last_error;
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn due_deliveries(
        &self,
        limit: i64,
        received_before: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>, AppError> {
        let shared = self.shared.lock().await;
        let mut due: Vec<WebhookDelivery> = shared
            .data
            .deliveries
            .iter()
            .filter(|d| match d.outcome {
                DeliveryOutcome::Deferred => true,
                DeliveryOutcome::Received => d.received_at <= received_before,
                DeliveryOutcome::Processed | DeliveryOutcome::Parked => false,
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }
}

fn invoice_by_order(data: &Data, order_id: &str) -> Option<Invoice> {
    data.invoices
        .values()
        .find(|i| i.order_id.as_deref() == Some(order_id))
        .cloned()
}

/// Transition an unpaid invoice. False if it is missing or not unpaid.
fn transition_unpaid(data: &mut Data, id: Uuid, to: InvoiceStatus) -> bool {
    let Some(invoice) = data.invoices.get_mut(&id) else {
        return false;
    };
    if invoice.status != InvoiceStatus::Unpaid {
        return false;
    }
    let now = Utc::now();
    invoice.status = to;
    invoice.updated_at = now;
    if to == InvoiceStatus::Paid {
        invoice.paid_at = Some(now);
    }
    true
}

#[async_trait]
impl StoreTx for MemoryTx {
    // The whole store is already held exclusively.
    async fn lock_transaction(&mut self, _transaction_id: &str) -> Result<(), AppError> {
        Ok(())
    }

    async fn lock_team(&mut self, _team: &str) -> Result<(), AppError> {
        Ok(())
    }

    async fn find_event(&mut self, transaction_id: &str) -> Result<Option<PaymentEvent>, AppError> {
        Ok(self.work.events.get(transaction_id).cloned())
    }

    async fn team_exists(&mut self, team: &str) -> Result<bool, AppError> {
        Ok(self.work.teams.contains_key(team))
    }

    async fn find_invoice_by_order(&mut self, order_id: &str) -> Result<Option<Invoice>, AppError> {
        Ok(invoice_by_order(&self.work, order_id))
    }

    async fn find_invoice(&mut self, id: Uuid) -> Result<Option<Invoice>, AppError> {
        Ok(self.work.invoices.get(&id).cloned())
    }

    async fn upsert_event(&mut self, fields: EventFields) -> Result<UpsertOutcome, AppError> {
        self.guard.take_failure(FailPoint::UpsertEvent)?;

        let now = Utc::now();
        let previous_status = self
            .work
            .events
            .get(&fields.transaction_id)
            .map(|e| e.payment_status);

        if let Some(stored) = self.work.events.get(&fields.transaction_id) {
            if fields.payment_status.rank() < stored.payment_status.rank() {
                return Ok(UpsertOutcome {
                    event: stored.clone(),
                    previous_status,
                    applied: false,
                });
            }
        }

        let event = match self.work.events.get_mut(&fields.transaction_id) {
            Some(existing) => {
                existing.raw_status = fields.raw_status;
                existing.payment_status = fields.payment_status;
                if fields.payment_type.is_some() {
                    existing.payment_type = fields.payment_type;
                }
                if existing.team.is_none() {
                    existing.team = fields.team;
                }
                if existing.invoice_id.is_none() {
                    existing.invoice_id = fields.invoice_id;
                }
                existing.amount = fields.amount;
                existing.currency = fields.currency;
                existing.payload = fields.payload;
                existing.needs_review = existing.team.is_none();
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let event = PaymentEvent {
                    id: Uuid::new_v4(),
                    transaction_id: fields.transaction_id.clone(),
                    order_id: fields.order_id,
                    raw_status: fields.raw_status,
                    payment_status: fields.payment_status,
                    payment_type: fields.payment_type,
                    needs_review: fields.team.is_none(),
                    team: fields.team,
                    invoice_id: fields.invoice_id,
                    amount: fields.amount,
                    currency: fields.currency,
                    payload: fields.payload,
                    created_at: now,
                    updated_at: now,
                };
                self.work.events.insert(fields.transaction_id, event.clone());
                event
            }
        };

        Ok(UpsertOutcome {
            event,
            previous_status,
            applied: true,
        })
    }

    async fn link_invoice(&mut self, transaction_id: &str, invoice_id: Uuid) -> Result<(), AppError> {
        if let Some(event) = self.work.events.get_mut(transaction_id) {
            event.invoice_id = Some(invoice_id);
            event.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn credit(&mut self, credit: NewCredit) -> Result<CreditOutcome, AppError> {
        self.guard.take_failure(FailPoint::Credit)?;

        if let Some(existing) = self.work.ledger.iter().find(|t| t.reference == credit.reference) {
            return Ok(CreditOutcome::AlreadyCredited(existing.clone()));
        }

        let Some(team) = self.work.teams.get_mut(&credit.team) else {
            return Err(AppError::Store(format!("team {} does not exist", credit.team)));
        };

        let now = Utc::now();
        team.balance += credit.amount;
        team.updated_at = now;

        let entry = LedgerTransaction {
            id: Uuid::new_v4(),
            team: credit.team,
            amount: credit.amount,
            currency: credit.currency,
            reference: credit.reference,
            source: PREPAID_CREDITS_SOURCE.to_string(),
            invoice_id: credit.invoice_id,
            created_at: now,
        };
        self.work.ledger.push(entry.clone());

        Ok(CreditOutcome::Created(entry))
    }

    async fn create_pending_invoice(&mut self, invoice: NewPendingInvoice) -> Result<Invoice, AppError> {
        self.guard.take_failure(FailPoint::CreateInvoice)?;

        let live = self.work.invoices.values().any(|i| {
            i.team == invoice.team
                && i.status == InvoiceStatus::Unpaid
                && i.purpose == InvoicePurpose::CreditPurchase
        });
        if live {
            return Err(AppError::Store(format!(
                "team {} already has an unpaid credit purchase",
                invoice.team
            )));
        }

        let now = Utc::now();
        let created = Invoice {
            id: Uuid::new_v4(),
            team: invoice.team,
            order_id: Some(invoice.order_id),
            purpose: InvoicePurpose::CreditPurchase,
            status: InvoiceStatus::Unpaid,
            amount: invoice.amount,
            currency: invoice.currency,
            created_at: now,
            updated_at: now,
            paid_at: None,
        };
        self.work.invoices.insert(created.id, created.clone());
        self.work.items.push(InvoiceItem {
            id: Uuid::new_v4(),
            invoice_id: created.id,
            description: "Prepaid credits".to_string(),
            amount: invoice.amount,
            reference_kind: ReferenceKind::PaymentEvent,
            reference_id: invoice.transaction_id,
        });

        Ok(created)
    }

    async fn mark_invoice_paid(&mut self, id: Uuid) -> Result<bool, AppError> {
        self.guard.take_failure(FailPoint::MarkInvoicePaid)?;
        Ok(transition_unpaid(&mut self.work, id, InvoiceStatus::Paid))
    }

    async fn void_invoice(&mut self, id: Uuid) -> Result<bool, AppError> {
        self.guard.take_failure(FailPoint::VoidInvoice)?;
        Ok(transition_unpaid(&mut self.work, id, InvoiceStatus::Empty))
    }

    async fn unpaid_credit_purchases(&mut self, team: &str) -> Result<Vec<Invoice>, AppError> {
        Ok(self
            .work
            .invoices
            .values()
            .filter(|i| {
                i.team == team
                    && i.status == InvoiceStatus::Unpaid
                    && i.purpose == InvoicePurpose::CreditPurchase
            })
            .cloned()
            .collect())
    }

    async fn pending_credit_purchase_events(&mut self, team: &str) -> Result<Vec<PaymentEvent>, AppError> {
        let invoices = &self.work.invoices;
        Ok(self
            .work
            .events
            .values()
            .filter(|e| e.team.as_deref() == Some(team) && e.payment_status == PaymentStatus::Pending)
            .filter(|e| match e.invoice_id {
                None => true,
                Some(id) => invoices
                    .get(&id)
                    .is_some_and(|i| i.purpose == InvoicePurpose::CreditPurchase),
            })
            .cloned()
            .collect())
    }

    async fn cancel_event(&mut self, transaction_id: &str) -> Result<(), AppError> {
        if let Some(event) = self.work.events.get_mut(transaction_id) {
            if event.payment_status == PaymentStatus::Pending {
                event.raw_status = "cancel".to_string();
                event.payment_status = PaymentStatus::Unpaid;
                event.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn repoint_invoice_items(
        &mut self,
        invoice_id: Uuid,
        ledger_transaction_id: Uuid,
    ) -> Result<(), AppError> {
        for item in self
            .work
            .items
            .iter_mut()
            .filter(|i| i.invoice_id == invoice_id && i.reference_kind == ReferenceKind::PaymentEvent)
        {
            item.reference_kind = ReferenceKind::LedgerTransaction;
            item.reference_id = ledger_transaction_id.to_string();
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryTx { mut guard, work } = *self;
        guard.data = work;
        Ok(())
    }
}
