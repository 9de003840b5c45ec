//! Deferred reconciliation worker.
//!
//! Replays webhook deliveries whose synchronous reconciliation failed, and
//! deliveries still `received` after `received_grace` (the process died or
//! the bookkeeping write failed mid-pass). Each replay rebuilds the
//! notification from the stored body and goes through the normal engine, so
//! a pass that already landed is a no-op. After `max_attempts` a delivery is
//! parked for an operator.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::AppError;
use crate::models::notification::PaymentNotification;
use crate::models::webhook_delivery::{DeliveryOutcome, WebhookDelivery};
use crate::services::reconciliation::Reconciler;
use crate::store::PaymentStore;

const BATCH_SIZE: i64 = 50;

/// Counts from one pass over the due deliveries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub processed: usize,
    pub deferred: usize,
    pub parked: usize,
}

#[derive(Clone)]
pub struct DeferredReconciliation {
    pub store: Arc<dyn PaymentStore>,
    pub reconciler: Arc<Reconciler>,
    pub interval: Duration,
    pub max_attempts: i32,
    /// How long a `received` delivery may stay unfinished before it is
    /// treated as abandoned
    pub received_grace: Duration,
    pub default_currency: String,
}

impl DeferredReconciliation {
    /// Call [`tick`](Self::tick) every `interval`, forever. Failed passes are
    /// logged and retried on the next tick.
    pub async fn run(self) {
        loop {
            tokio::time::sleep(self.interval).await;
            if let Err(err) = self.tick().await {
                tracing::error!(error = %err, "deferred reconciliation pass failed");
            }
        }
    }

    /// Replay one batch of due deliveries.
    ///
    /// # Returns
    ///
    /// How many deliveries were processed, deferred again or parked.
    ///
    /// # Errors
    ///
    /// The store could not list deliveries or record an outcome. Replays
    /// that fail are not errors; they are counted and recorded.
    pub async fn tick(&self) -> Result<TickSummary, AppError> {
        let mut summary = TickSummary::default();

        // Step 1: anything deferred, plus `received` rows nobody finished
        let received_before = TimeDelta::from_std(self.received_grace)
            .ok()
            .and_then(|grace| Utc::now().checked_sub_signed(grace))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let due = self.store.due_deliveries(BATCH_SIZE, received_before).await?;

        for delivery in due {
            let attempts = delivery.attempts + 1;

            // Step 2: replay and record the outcome

            match self.replay(&delivery).await {
                Ok(()) => {
                    self.store
                        .update_delivery(delivery.id, DeliveryOutcome::Processed, attempts, None)
                        .await?;
                    summary.processed += 1;
                }
                Err(err) if attempts >= self.max_attempts => {
                    tracing::error!(
                        delivery_id = %delivery.id,
                        transaction_id = %delivery.transaction_id,
                        order_id = %delivery.order_id,
                        attempts,
                        error = %err,
                        "delivery parked after repeated reconciliation failures"
                    );
                    self.store
                        .update_delivery(
                            delivery.id,
                            DeliveryOutcome::Parked,
                            attempts,
                            Some(err.to_string()),
                        )
                        .await?;
                    summary.parked += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        delivery_id = %delivery.id,
                        transaction_id = %delivery.transaction_id,
                        attempts,
                        error = %err,
                        "deferred reconciliation failed again"
                    );
                    self.store
                        .update_delivery(
                            delivery.id,
                            DeliveryOutcome::Deferred,
                            attempts,
                            Some(err.to_string()),
                        )
                        .await?;
                    summary.deferred += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn replay(&self, delivery: &WebhookDelivery) -> Result<(), AppError> {
        let body = serde_json::to_vec(&delivery.payload)
            .map_err(|e| AppError::MalformedNotification(e.to_string()))?;
        let notification = PaymentNotification::from_body(&body, &self.default_currency)?;
        self.reconciler.reconcile(&notification).await?;
        Ok(())
    }
}
