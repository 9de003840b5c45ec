//! Payment event reconciliation.
//!
//! Turns a validated gateway notification into exactly-once ledger and
//! invoice effects. Webhooks, manual status checks and the deferred retry
//! worker all come through [`Reconciler::reconcile`].
//!
//! # Unit of work
//!
//! One store transaction per notification:
//!
//! 1. lock the transaction id, read the stored event
//! 2. resolve the team and lock it
//! 3. upsert the event, unless its status ranks below the stored one (checked
//!    after the team lock, so a sibling cancellation that committed while we
//!    waited is seen)
//! 4. side effects:
//!    - first time Paid: credit (idempotent on the transaction id), settle
//!      the linked invoice, cancel the team's other pending purchases
//!    - first Pending with no invoice: void the team's unpaid credit purchase
//!      and open a new one linked to the event
//! 5. commit
//!
//! Any error before commit rolls the whole pass back, so a credit never
//! lands without its invoice update or the other way round.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    invoice::{Invoice, InvoicePurpose, InvoiceStatus, NewPendingInvoice},
    ledger::{CreditOutcome, NewCredit},
    notification::PaymentNotification,
    payment_event::{EventFields, PaymentEvent, PaymentStatus},
};
use crate::services::team_resolver;
use crate::store::{PaymentStore, StoreTx};

/// How a notification moved the event's normalized status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// First sighting, already terminal-unpaid
    New,
    /// Same status as before (redelivery or raw status change within it)
    UpdatedNoTransition,
    TransitionedToPaid,
    TransitionedToPending,
    TransitionedToUnpaid,
    /// Ranked below the stored status; event left untouched
    Stale,
}

impl Transition {
    fn between(previous: Option<PaymentStatus>, current: PaymentStatus) -> Self {
        match (previous, current) {
            (Some(prev), cur) if prev == cur => Transition::UpdatedNoTransition,
            (_, PaymentStatus::Paid) => Transition::TransitionedToPaid,
            (_, PaymentStatus::Pending) => Transition::TransitionedToPending,
            (None, PaymentStatus::Unpaid) => Transition::New,
            (Some(_), PaymentStatus::Unpaid) => Transition::TransitionedToUnpaid,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Transition::New => "new",
            Transition::UpdatedNoTransition => "updated_no_transition",
            Transition::TransitionedToPaid => "transitioned_to_paid",
            Transition::TransitionedToPending => "transitioned_to_pending",
            Transition::TransitionedToUnpaid => "transitioned_to_unpaid",
            Transition::Stale => "stale",
        }
    }
}

/// A side effect applied by one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Effect {
    Credited {
        ledger_transaction_id: Uuid,
        amount: i64,
    },
    AlreadyCredited {
        ledger_transaction_id: Uuid,
    },
    InvoicePaid {
        invoice_id: Uuid,
    },
    InvoiceCreated {
        invoice_id: Uuid,
    },
    InvoiceVoided {
        invoice_id: Uuid,
    },
    SiblingCancelled {
        transaction_id: String,
    },
    /// Stored without a team; needs manual reconciliation
    TeamUnresolved,
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub transaction_id: String,
    pub previous_status: Option<PaymentStatus>,
    pub status: PaymentStatus,
    pub transition: Transition,
    pub team: Option<String>,
    pub invoice_id: Option<Uuid>,
    pub effects: Vec<Effect>,
}

pub struct Reconciler {
    store: Arc<dyn PaymentStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }

    /// Apply one notification.
    ///
    /// # Arguments
    ///
    /// * `notification` - A validated notification from a webhook, a status
    ///   check or a replayed delivery
    ///
    /// # Returns
    ///
    /// What the pass did. A notification ranked below the stored status comes
    /// back as [`Transition::Stale`] with no effects.
    ///
    /// # Errors
    ///
    /// Any store failure. Nothing of the pass is committed in that case, so
    /// the same notification can be applied again later.
    pub async fn reconcile(
        &self,
        notification: &PaymentNotification,
    ) -> Result<ReconcileReport, AppError> {
        // Step 1: serialize on the transaction id
        let mut tx = self.store.begin().await?;
        tx.lock_transaction(&notification.transaction_id).await?;

        let existing = tx.find_event(&notification.transaction_id).await?;

        // Step 2: find the owning team and serialize on it. A sibling
        // settlement of the same team may commit while we wait here.
        let resolution =
            team_resolver::resolve(tx.as_mut(), existing.as_ref(), &notification.order_id).await?;
        if let Some(team) = &resolution.team {
            tx.lock_team(team).await?;
        }

        // Step 3: write the event; the store compares ranks under its row lock
        let outcome = tx
            .upsert_event(EventFields {
                transaction_id: notification.transaction_id.clone(),
                order_id: notification.order_id.clone(),
                raw_status: notification.raw_status.clone(),
                payment_status: notification.payment_status,
                payment_type: notification.payment_type.clone(),
                team: resolution.team,
                invoice_id: resolution.invoice_id,
                amount: notification.amount,
                currency: notification.currency.clone(),
                payload: notification.payload.clone(),
            })
            .await?;

        if !outcome.applied {
            tx.commit().await?;
            let stored = outcome.event;
            tracing::info!(
                transaction_id = %stored.transaction_id,
                order_id = %stored.order_id,
                stored = stored.payment_status.as_str(),
                incoming = notification.payment_status.as_str(),
                "stale notification ignored"
            );
            return Ok(ReconcileReport {
                transaction_id: stored.transaction_id,
                previous_status: Some(stored.payment_status),
                status: stored.payment_status,
                transition: Transition::Stale,
                team: stored.team,
                invoice_id: stored.invoice_id,
                effects: Vec::new(),
            });
        }

        let event = outcome.event;
        let previous_status = outcome.previous_status;
        let mut invoice_id = event.invoice_id;
        let mut effects = Vec::new();

        // Step 4: side effects of the new status
        match event.team.as_deref() {
            None => {
                tracing::warn!(
                    transaction_id = %event.transaction_id,
                    order_id = %event.order_id,
                    "no team for payment event, flagged for review"
                );
                effects.push(Effect::TeamUnresolved);
            }
            Some(team) => {
                if event.payment_status == PaymentStatus::Paid
                    && previous_status != Some(PaymentStatus::Paid)
                {
                    settle(tx.as_mut(), &event, team, &mut effects).await?;
                } else if event.payment_status == PaymentStatus::Pending && invoice_id.is_none() {
                    invoice_id = Some(open_purchase(tx.as_mut(), &event, team, &mut effects).await?);
                }
            }
        }

        // Step 5: publish everything at once
        tx.commit().await?;

        let transition = Transition::between(previous_status, event.payment_status);
        tracing::info!(
            transaction_id = %event.transaction_id,
            order_id = %event.order_id,
            team = event.team.as_deref().unwrap_or("-"),
            status = event.payment_status.as_str(),
            transition = transition.as_str(),
            effects = effects.len(),
            "payment event reconciled"
        );

        Ok(ReconcileReport {
            transaction_id: event.transaction_id,
            previous_status,
            status: event.payment_status,
            transition,
            team: event.team,
            invoice_id,
            effects,
        })
    }
}

/// First arrival at Paid.
async fn settle(
    tx: &mut dyn StoreTx,
    event: &PaymentEvent,
    team: &str,
    effects: &mut Vec<Effect>,
) -> Result<(), AppError> {
    let invoice: Option<Invoice> = match event.invoice_id {
        Some(id) => tx.find_invoice(id).await?,
        None => None,
    };

    // Paying a subscription invoice settles it and nothing else.
    if let Some(inv) = invoice.as_ref().filter(|i| i.purpose == InvoicePurpose::Subscription) {
        if tx.mark_invoice_paid(inv.id).await? {
            effects.push(Effect::InvoicePaid { invoice_id: inv.id });
        }
        return Ok(());
    }

    let credit = tx
        .credit(NewCredit {
            team: team.to_string(),
            amount: event.amount,
            currency: event.currency.clone(),
            reference: event.transaction_id.clone(),
            invoice_id: invoice.as_ref().map(|i| i.id),
        })
        .await?;

    let ledger_transaction_id = credit.transaction().id;
    match &credit {
        CreditOutcome::Created(entry) => effects.push(Effect::Credited {
            ledger_transaction_id,
            amount: entry.amount,
        }),
        CreditOutcome::AlreadyCredited(_) => {
            effects.push(Effect::AlreadyCredited {
                ledger_transaction_id,
            });
        }
    }

    if let Some(inv) = &invoice {
        if inv.status == InvoiceStatus::Empty {
            tracing::warn!(
                transaction_id = %event.transaction_id,
                invoice_id = %inv.id,
                team,
                "payment settled against a voided invoice; credited, invoice left empty"
            );
        } else {
            if tx.mark_invoice_paid(inv.id).await? {
                effects.push(Effect::InvoicePaid { invoice_id: inv.id });
            }
            tx.repoint_invoice_items(inv.id, ledger_transaction_id).await?;
        }
    }

    cancel_siblings(tx, event, team, invoice.map(|i| i.id), effects).await
}

/// Once one purchase attempt is paid, no other attempt of the team may
/// still succeed or linger.
async fn cancel_siblings(
    tx: &mut dyn StoreTx,
    event: &PaymentEvent,
    team: &str,
    paid_invoice: Option<Uuid>,
    effects: &mut Vec<Effect>,
) -> Result<(), AppError> {
    for sibling in tx.pending_credit_purchase_events(team).await? {
        if sibling.transaction_id == event.transaction_id {
            continue;
        }
        tx.cancel_event(&sibling.transaction_id).await?;
        tracing::info!(
            transaction_id = %sibling.transaction_id,
            settled_by = %event.transaction_id,
            team,
            "sibling purchase cancelled"
        );
        effects.push(Effect::SiblingCancelled {
            transaction_id: sibling.transaction_id,
        });
    }

    for invoice in tx.unpaid_credit_purchases(team).await? {
        if Some(invoice.id) == paid_invoice {
            continue;
        }
        if tx.void_invoice(invoice.id).await? {
            effects.push(Effect::InvoiceVoided {
                invoice_id: invoice.id,
            });
        }
    }

    Ok(())
}

/// First Pending for a standalone credit purchase: keep exactly one live
/// purchase invoice for the team.
async fn open_purchase(
    tx: &mut dyn StoreTx,
    event: &PaymentEvent,
    team: &str,
    effects: &mut Vec<Effect>,
) -> Result<Uuid, AppError> {
    for superseded in tx.unpaid_credit_purchases(team).await? {
        if tx.void_invoice(superseded.id).await? {
            effects.push(Effect::InvoiceVoided {
                invoice_id: superseded.id,
            });
        }
    }

    let invoice = tx
        .create_pending_invoice(NewPendingInvoice {
            team: team.to_string(),
            order_id: event.order_id.clone(),
            amount: event.amount,
            currency: event.currency.clone(),
            transaction_id: event.transaction_id.clone(),
        })
        .await?;
    tx.link_invoice(&event.transaction_id, invoice.id).await?;

    effects.push(Effect::InvoiceCreated {
        invoice_id: invoice.id,
    });
    Ok(invoice.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table() {
        use PaymentStatus::*;

        assert_eq!(Transition::between(None, Pending), Transition::TransitionedToPending);
        assert_eq!(Transition::between(None, Unpaid), Transition::New);
        assert_eq!(Transition::between(None, Paid), Transition::TransitionedToPaid);
        assert_eq!(Transition::between(Some(Pending), Paid), Transition::TransitionedToPaid);
        assert_eq!(Transition::between(Some(Unpaid), Paid), Transition::TransitionedToPaid);
        assert_eq!(Transition::between(Some(Pending), Unpaid), Transition::TransitionedToUnpaid);
        assert_eq!(Transition::between(Some(Paid), Paid), Transition::UpdatedNoTransition);
        assert_eq!(Transition::between(Some(Pending), Pending), Transition::UpdatedNoTransition);
    }
}
