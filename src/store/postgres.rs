//! PostgreSQL store.
//!
//! One sqlx transaction per [`StoreTx`]. Serialization uses
//! transaction-scoped advisory locks, so two deliveries of the same
//! transaction id (or two reconciliations touching the same team) queue up
//! behind each other and release automatically on commit or rollback.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::{
    api_key::ApiKey,
    invoice::{Invoice, InvoiceItem, NewPendingInvoice},
    ledger::{CreditOutcome, LedgerTransaction, NewCredit, PREPAID_CREDITS_SOURCE},
    payment_event::{EventFields, PaymentEvent, UpsertOutcome},
    team::Team,
    webhook_delivery::{DeliveryOutcome, NewDelivery, WebhookDelivery},
};
use crate::store::{PaymentStore, StoreTx};

/// Line item description on credit purchase invoices.
const CREDIT_PURCHASE_ITEM: &str = "Prepaid credits";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    async fn advisory_lock(&mut self, key: String) -> Result<(), AppError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(key)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_event(&self, transaction_id: &str) -> Result<Option<PaymentEvent>, AppError> {
        let event =
            sqlx::query_as::<_, PaymentEvent>("SELECT * FROM payment_events WHERE transaction_id = $1")
                .bind(transaction_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(event)
    }

    async fn find_api_key(&self, key_hash: &str) -> Result<Option<ApiKey>, AppError> {
        let key = sqlx::query_as::<_, ApiKey>(
            "SELECT id, key_hash, team, created_at, is_active
             FROM api_keys
             WHERE key_hash = $1 AND is_active = true",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }

    async fn find_team(&self, name: &str) -> Result<Option<Team>, AppError> {
        let team = sqlx::query_as::<_, Team>("SELECT * FROM teams WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(team)
    }

    async fn find_invoice_by_order(&self, order_id: &str) -> Result<Option<Invoice>, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(invoice)
    }

    async fn list_invoices(&self, team: &str) -> Result<Vec<Invoice>, AppError> {
        let invoices = sqlx::query_as::<_, Invoice>(
            "SELECT * FROM invoices WHERE team = $1 ORDER BY created_at DESC",
        )
        .bind(team)
        .fetch_all(&self.pool)
        .await?;
        Ok(invoices)
    }

    async fn invoice_items(&self, invoice_id: Uuid) -> Result<Vec<InvoiceItem>, AppError> {
        let items =
            sqlx::query_as::<_, InvoiceItem>("SELECT * FROM invoice_items WHERE invoice_id = $1")
                .bind(invoice_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(items)
    }

    async fn list_ledger(&self, team: &str) -> Result<Vec<LedgerTransaction>, AppError> {
        let entries = sqlx::query_as::<_, LedgerTransaction>(
            "SELECT * FROM ledger_transactions WHERE team = $1 ORDER BY created_at DESC",
        )
        .bind(team)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn record_delivery(&self, delivery: NewDelivery) -> Result<WebhookDelivery, AppError> {
        let row = sqlx::query_as::<_, WebhookDelivery>(
            r#"
            INSERT INTO webhook_deliveries (
                transaction_id,
                order_id,
                raw_status,
                signature_state,
                payload,
                outcome
            )
            VALUES ($1, $2, $3, $4, $5, 'received')
            RETURNING *
            "#,
        )
        .bind(delivery.transaction_id)
        .bind(delivery.order_id)
        .bind(delivery.raw_status)
        .bind(delivery.signature_state.as_str())
        .bind(delivery.payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_delivery(
        &self,
        id: Uuid,
        outcome: DeliveryOutcome,
        attempts: i32,
        last_error: Option<String>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET outcome = $2, attempts = $3, last_error = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(outcome.as_str())
        .bind(attempts)
        .bind(last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn due_deliveries(
        &self,
        limit: i64,
        received_before: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>, AppError> {
        let rows = sqlx::query_as::<_, WebhookDelivery>(
            r#"
            SELECT * FROM webhook_deliveries
            WHERE outcome = 'deferred'
               OR (outcome = 'received' AND received_at <= $2)
            ORDER BY updated_at
            LIMIT $1
            "#,
        )
        .bind(limit)
        .bind(received_before)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn lock_transaction(&mut self, transaction_id: &str) -> Result<(), AppError> {
        self.advisory_lock(format!("payment_event:{transaction_id}")).await
    }

    async fn lock_team(&mut self, team: &str) -> Result<(), AppError> {
        self.advisory_lock(format!("team:{team}")).await
    }

    async fn find_event(&mut self, transaction_id: &str) -> Result<Option<PaymentEvent>, AppError> {
        let event =
            sqlx::query_as::<_, PaymentEvent>("SELECT * FROM payment_events WHERE transaction_id = $1")
                .bind(transaction_id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(event)
    }

    async fn team_exists(&mut self, team: &str) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM teams WHERE name = $1)")
            .bind(team)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(exists)
    }

    async fn find_invoice_by_order(&mut self, order_id: &str) -> Result<Option<Invoice>, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(invoice)
    }

    async fn find_invoice(&mut self, id: Uuid) -> Result<Option<Invoice>, AppError> {
        let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(invoice)
    }

    async fn upsert_event(&mut self, fields: EventFields) -> Result<UpsertOutcome, AppError> {
        // Read under the row lock. A sibling cancellation may have committed
        // after the caller's own read, so the rank is compared here.
        let stored = sqlx::query_as::<_, PaymentEvent>(
            "SELECT * FROM payment_events WHERE transaction_id = $1 FOR UPDATE",
        )
        .bind(&fields.transaction_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        let previous_status = stored.as_ref().map(|e| e.payment_status);
        if let Some(stored) = stored {
            if fields.payment_status.rank() < stored.payment_status.rank() {
                return Ok(UpsertOutcome {
                    event: stored,
                    previous_status,
                    applied: false,
                });
            }
        }

        let event = sqlx::query_as::<_, PaymentEvent>(
            r#"
            INSERT INTO payment_events (
                transaction_id,
                order_id,
                raw_status,
                payment_status,
                payment_type,
                team,
                invoice_id,
                amount,
                currency,
                payload,
                needs_review
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $6 IS NULL)
            ON CONFLICT (transaction_id) DO UPDATE SET
                raw_status = EXCLUDED.raw_status,
                payment_status = EXCLUDED.payment_status,
                payment_type = COALESCE(EXCLUDED.payment_type, payment_events.payment_type),
                team = COALESCE(payment_events.team, EXCLUDED.team),
                invoice_id = COALESCE(payment_events.invoice_id, EXCLUDED.invoice_id),
                amount = EXCLUDED.amount,
                currency = EXCLUDED.currency,
                payload = EXCLUDED.payload,
                needs_review = COALESCE(payment_events.team, EXCLUDED.team) IS NULL,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(&fields.transaction_id)
        .bind(&fields.order_id)
        .bind(&fields.raw_status)
        .bind(fields.payment_status.as_str())
        .bind(&fields.payment_type)
        .bind(&fields.team)
        .bind(fields.invoice_id)
        .bind(fields.amount)
        .bind(&fields.currency)
        .bind(&fields.payload)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(UpsertOutcome {
            event,
            previous_status,
            applied: true,
        })
    }

    async fn link_invoice(&mut self, transaction_id: &str, invoice_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE payment_events SET invoice_id = $2, updated_at = NOW() WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .bind(invoice_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn credit(&mut self, credit: NewCredit) -> Result<CreditOutcome, AppError> {
        let inserted = sqlx::query_as::<_, LedgerTransaction>(
            r#"
            INSERT INTO ledger_transactions (team, amount, currency, reference, source, invoice_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (reference) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&credit.team)
        .bind(credit.amount)
        .bind(&credit.currency)
        .bind(&credit.reference)
        .bind(PREPAID_CREDITS_SOURCE)
        .bind(credit.invoice_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(entry) = inserted {
            sqlx::query(
                r#"
                UPDATE teams
                SET balance = balance + $1,
                    updated_at = NOW()
                WHERE name = $2
                "#,
            )
            .bind(entry.amount)
            .bind(&entry.team)
            .execute(&mut *self.tx)
            .await?;

            return Ok(CreditOutcome::Created(entry));
        }

        let existing = sqlx::query_as::<_, LedgerTransaction>(
            "SELECT * FROM ledger_transactions WHERE reference = $1",
        )
        .bind(&credit.reference)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(CreditOutcome::AlreadyCredited(existing))
    }

    async fn create_pending_invoice(&mut self, invoice: NewPendingInvoice) -> Result<Invoice, AppError> {
        let created = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (team, order_id, purpose, status, amount, currency)
            VALUES ($1, $2, 'credit_purchase', 'unpaid', $3, $4)
            RETURNING *
            "#,
        )
        .bind(&invoice.team)
        .bind(&invoice.order_id)
        .bind(invoice.amount)
        .bind(&invoice.currency)
        .fetch_one(&mut *self.tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO invoice_items (invoice_id, description, amount, reference_kind, reference_id)
            VALUES ($1, $2, $3, 'payment_event', $4)
            "#,
        )
        .bind(created.id)
        .bind(CREDIT_PURCHASE_ITEM)
        .bind(invoice.amount)
        .bind(&invoice.transaction_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(created)
    }

    async fn mark_invoice_paid(&mut self, id: Uuid) -> Result<bool, AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'paid', paid_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'unpaid'
            "#,
        )
        .bind(id)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    async fn void_invoice(&mut self, id: Uuid) -> Result<bool, AppError> {
        let updated = sqlx::query(
            "UPDATE invoices SET status = 'empty', updated_at = NOW() WHERE id = $1 AND status = 'unpaid'",
        )
        .bind(id)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    async fn unpaid_credit_purchases(&mut self, team: &str) -> Result<Vec<Invoice>, AppError> {
        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT * FROM invoices
            WHERE team = $1 AND status = 'unpaid' AND purpose = 'credit_purchase'
            FOR UPDATE
            "#,
        )
        .bind(team)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(invoices)
    }

    async fn pending_credit_purchase_events(&mut self, team: &str) -> Result<Vec<PaymentEvent>, AppError> {
        let events = sqlx::query_as::<_, PaymentEvent>(
            r#"
            SELECT e.* FROM payment_events e
            LEFT JOIN invoices i ON i.id = e.invoice_id
            WHERE e.team = $1
              AND e.payment_status = 'pending'
              AND (e.invoice_id IS NULL OR i.purpose = 'credit_purchase')
            "#,
        )
        .bind(team)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(events)
    }

    async fn cancel_event(&mut self, transaction_id: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE payment_events
            SET raw_status = 'cancel', payment_status = 'unpaid', updated_at = NOW()
            WHERE transaction_id = $1 AND payment_status = 'pending'
            "#,
        )
        .bind(transaction_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn repoint_invoice_items(
        &mut self,
        invoice_id: Uuid,
        ledger_transaction_id: Uuid,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE invoice_items
            SET reference_kind = 'ledger_transaction', reference_id = $2
            WHERE invoice_id = $1 AND reference_kind = 'payment_event'
            "#,
        )
        .bind(invoice_id)
        .bind(ledger_transaction_id.to_string())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }
}
