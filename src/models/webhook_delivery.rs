//! Webhook delivery log.
//!
//! Every notification that passes parsing and signature checks is appended to
//! `webhook_deliveries` before reconciliation runs, so the raw body survives a
//! failed pass and can be replayed by the deferred reconciliation worker.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::UnknownVariant;
use crate::models::notification::PaymentNotification;

/// Whether the delivery carried a valid signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureState {
    Verified,
    /// Accepted without a signature (permissive sandbox mode only)
    Missing,
}

impl SignatureState {
    pub fn as_str(self) -> &'static str {
        match self {
            SignatureState::Verified => "verified",
            SignatureState::Missing => "missing",
        }
    }
}

impl TryFrom<String> for SignatureState {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "verified" => Ok(SignatureState::Verified),
            "missing" => Ok(SignatureState::Missing),
            _ => Err(UnknownVariant::new("signature state", value)),
        }
    }
}

/// Where a delivery is in its reconciliation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Recorded, reconciliation not finished yet. Replayed once older than
    /// the retry grace period.
    Received,
    /// Reconciled (including stale and no-op deliveries)
    Processed,
    /// Reconciliation failed; the retry worker will replay it
    Deferred,
    /// Retries exhausted; needs an operator
    Parked,
}

impl DeliveryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryOutcome::Received => "received",
            DeliveryOutcome::Processed => "processed",
            DeliveryOutcome::Deferred => "deferred",
            DeliveryOutcome::Parked => "parked",
        }
    }
}

impl TryFrom<String> for DeliveryOutcome {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "received" => Ok(DeliveryOutcome::Received),
            "processed" => Ok(DeliveryOutcome::Processed),
            "deferred" => Ok(DeliveryOutcome::Deferred),
            "parked" => Ok(DeliveryOutcome::Parked),
            _ => Err(UnknownVariant::new("delivery outcome", value)),
        }
    }
}

/// Webhook delivery record.
///
/// # Database Table
///
/// Maps to the `webhook_deliveries` table. Append-only apart from
/// `outcome`, `attempts` and `last_error`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub transaction_id: String,
    pub order_id: String,
    pub raw_status: String,
    #[sqlx(try_from = "String")]
    pub signature_state: SignatureState,
    pub payload: serde_json::Value,
    #[sqlx(try_from = "String")]
    pub outcome: DeliveryOutcome,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A delivery to append.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub transaction_id: String,
    pub order_id: String,
    pub raw_status: String,
    pub signature_state: SignatureState,
    pub payload: serde_json::Value,
}

impl NewDelivery {
    pub fn new(notification: &PaymentNotification, signature_state: SignatureState) -> Self {
        Self {
            transaction_id: notification.transaction_id.clone(),
            order_id: notification.order_id.clone(),
            raw_status: notification.raw_status.clone(),
            signature_state,
            payload: notification.payload.clone(),
        }
    }
}
