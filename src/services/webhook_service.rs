//! Inbound gateway notifications.
//!
//! This module takes a raw webhook body through the boundary checks and into
//! the reconciliation engine, and keeps the delivery log.
//!
//! # Flow
//!
//! 1. Parse the body into a validated notification (400 on failure)
//! 2. Verify the signature (401 on mismatch, or on absence when required)
//! 3. Append the delivery to `webhook_deliveries`
//! 4. Reconcile; on failure mark the delivery deferred for the retry worker
//!
//! Once step 3 succeeds the gateway gets a success answer whatever step 4
//! does. It cannot fix our internal errors, and the delivery log keeps the
//! body for replay.

use uuid::Uuid;

use crate::error::AppError;
use crate::models::notification::{GatewayNotification, PaymentNotification};
use crate::models::webhook_delivery::{DeliveryOutcome, NewDelivery, SignatureState};
use crate::services::reconciliation::ReconcileReport;
use crate::state::AppState;

/// Header the signature may be sent in. Midtrans itself puts it in the
/// body as `signature_key`.
pub const SIGNATURE_HEADER: &str = "x-midtrans-signature";

/// What happened to an accepted delivery.
#[derive(Debug)]
pub struct Ingested {
    pub delivery_id: Uuid,
    /// `None` when reconciliation was deferred
    pub report: Option<ReconcileReport>,
}

/// Accept one webhook delivery.
///
/// # Arguments
///
/// * `state` - Application state holding the verifier, policy, store and reconciler
/// * `header_signature` - `X-Midtrans-Signature`, if sent; otherwise the
///   body's `signature_key` is used
/// * `body` - Raw request body
///
/// # Returns
///
/// The delivery id and, unless reconciliation was deferred, its report.
///
/// # Errors
///
/// - `MalformedNotification`: body is not a valid notification; nothing stored
/// - `InvalidSignature`: bad signature, or none while signatures are required;
///   nothing stored
/// - store errors while recording the delivery, so the gateway retries.
///   Failures after that point are logged, never returned
pub async fn ingest(
    state: &AppState,
    header_signature: Option<&str>,
    body: &[u8],
) -> Result<Ingested, AppError> {
    // Step 1: parse
    let payload: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| AppError::MalformedNotification(e.to_string()))?;
    let envelope = GatewayNotification::from_value(&payload)?;

    // Step 2: verify
    let signature = header_signature
        .map(str::to_string)
        .or_else(|| envelope.signature_key.clone())
        .filter(|s| !s.trim().is_empty());

    let signature_state = match signature {
        Some(sig) => {
            if !state.verifier.verify(&payload, &sig) {
                tracing::warn!(
                    order_id = %envelope.order_id,
                    transaction_id = %envelope.transaction_id,
                    received_signature = %sig,
                    "notification signature mismatch"
                );
                return Err(AppError::InvalidSignature);
            }
            SignatureState::Verified
        }
        None if state.policy.require_signature => {
            tracing::warn!(
                order_id = %envelope.order_id,
                transaction_id = %envelope.transaction_id,
                "unsigned notification rejected"
            );
            return Err(AppError::InvalidSignature);
        }
        None => {
            tracing::warn!(
                order_id = %envelope.order_id,
                transaction_id = %envelope.transaction_id,
                "accepting unsigned notification"
            );
            SignatureState::Missing
        }
    };

    let notification =
        PaymentNotification::from_envelope(envelope, payload, &state.policy.default_currency)?;

    // Step 3: record; from here on the gateway gets a success answer
    let delivery = state
        .store
        .record_delivery(NewDelivery::new(&notification, signature_state))
        .await?;

    // Step 4: reconcile, or defer to the retry worker
    match state.reconciler.reconcile(&notification).await {
        Ok(report) => {
            // The effects are committed. A failed bookkeeping write leaves the
            // row `received`; the retry worker replays it as a no-op later.
            if let Err(update_err) = state
                .store
                .update_delivery(delivery.id, DeliveryOutcome::Processed, 1, None)
                .await
            {
                tracing::error!(
                    delivery_id = %delivery.id,
                    transaction_id = %notification.transaction_id,
                    error = %update_err,
                    "could not mark delivery processed"
                );
            }
            Ok(Ingested {
                delivery_id: delivery.id,
                report: Some(report),
            })
        }
        Err(err) => {
            tracing::error!(
                transaction_id = %notification.transaction_id,
                order_id = %notification.order_id,
                delivery_id = %delivery.id,
                error = %err,
                "reconciliation failed, deferred"
            );
            if let Err(update_err) = state
                .store
                .update_delivery(delivery.id, DeliveryOutcome::Deferred, 1, Some(err.to_string()))
                .await
            {
                tracing::error!(delivery_id = %delivery.id, error = %update_err, "could not mark delivery deferred");
            }
            Ok(Ingested {
                delivery_id: delivery.id,
                report: None,
            })
        }
    }
}
