//! Team-facing payment operations: manual status checks, starting a credit
//! purchase, and reading a payment event.
//!
//! Every operation is scoped to the calling team. Events of other teams are
//! reported as not found.

use chrono::Utc;

use crate::error::AppError;
use crate::gateway::{ChargeRequest, GatewayError, PaymentMethod};
use crate::models::notification::{PaymentNotification, currency_exponent, parse_minor_units};
use crate::models::payment_event::PaymentEventResponse;
use crate::models::purchase::{PurchaseRequest, PurchaseResponse};
use crate::services::reconciliation::ReconcileReport;
use crate::services::team_resolver::{self, CREDITS_PREFIX};
use crate::state::AppState;

/// Longest order id the gateway accepts.
const MAX_ORDER_ID_LEN: usize = 50;

const EWALLET_CHANNELS: [&str; 2] = ["gopay", "shopeepay"];

/// Fetch the gateway's current status for a transaction and reconcile it
/// through the same pipeline as webhooks.
///
/// # Arguments
///
/// * `state` - Application state holding the store, gateway and reconciler
/// * `team` - Authenticated caller; only its own payments can be checked
/// * `transaction_id` - Gateway transaction id, known locally or not
///
/// # Returns
///
/// The reconciliation report for the gateway's current status.
///
/// # Errors
///
/// - `TransactionNotFound`: the event belongs to another team, or an unknown
///   transaction's order id does not resolve to the caller
/// - `Gateway`: the gateway could not be reached or refused; nothing changed
pub async fn check_status(
    state: &AppState,
    team: &str,
    transaction_id: &str,
) -> Result<ReconcileReport, AppError> {
    // Step 1: a stored event must already be the caller's
    let existing = state.store.find_event(transaction_id).await?;
    if let Some(event) = &existing {
        if event.team.as_deref() != Some(team) {
            return Err(AppError::TransactionNotFound);
        }
    }

    // Step 2: ask the gateway; a refusal leaves everything untouched
    let status = state.gateway.get_status(transaction_id).await?;

    let notification = PaymentNotification::from_envelope(
        status.envelope,
        status.payload,
        &state.policy.default_currency,
    )
    .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

    if notification.transaction_id != transaction_id {
        return Err(AppError::TransactionNotFound);
    }

    // Step 3: an unknown transaction must resolve to the caller
    if existing.is_none() && owning_team(state, &notification.order_id).await?.as_deref() != Some(team) {
        return Err(AppError::TransactionNotFound);
    }

    // Step 4: same engine as webhooks
    state.reconciler.reconcile(&notification).await
}

/// Team an unknown transaction would be attributed to.
async fn owning_team(state: &AppState, order_id: &str) -> Result<Option<String>, AppError> {
    if let Some(invoice) = state.store.find_invoice_by_order(order_id).await? {
        return Ok(Some(invoice.team));
    }

    for candidate in team_resolver::order_id_candidates(order_id) {
        if state.store.find_team(&candidate).await?.is_some() {
            return Ok(Some(candidate));
        }
    }

    Ok(None)
}

/// Start a credit purchase with the gateway.
///
/// Nothing is stored here. The purchase invoice is opened by the first
/// pending notification for the new order id.
///
/// # Arguments
///
/// * `team` - Authenticated caller, embedded in the order id
/// * `request` - Amount as a decimal string, optional currency (defaults to
///   the team's) and payment method
///
/// # Returns
///
/// The generated order id, the amount in minor units and the gateway's
/// charge details (VA numbers, QR or deeplink actions).
///
/// # Errors
///
/// - `InvalidRequest`: amount below one major unit or not a valid decimal,
///   unsupported method, or a team name too long for an order id
/// - `Gateway`: the charge was refused; the gateway's messages are passed on
pub async fn start_purchase(
    state: &AppState,
    team: &str,
    request: PurchaseRequest,
) -> Result<PurchaseResponse, AppError> {
    // Step 1: validate amount and method
    let currency = match request.currency {
        Some(currency) => currency.trim().to_ascii_uppercase(),
        None => state
            .store
            .find_team(team)
            .await?
            .map(|t| t.currency)
            .unwrap_or_else(|| state.policy.default_currency.clone()),
    };

    let amount = parse_minor_units(&request.amount, &currency).map_err(AppError::InvalidRequest)?;
    let minimum = 10i64.pow(currency_exponent(&currency));
    if amount < minimum {
        return Err(AppError::InvalidRequest(format!(
            "Minimum purchase is 1 {currency}"
        )));
    }

    validate_method(&request.method)?;

    // Step 2: order id the team resolver can read back
    let order_id = format!(
        "{CREDITS_PREFIX}{team}-{}",
        Utc::now().format("%Y%m%d%H%M%S")
    );
    if order_id.len() > MAX_ORDER_ID_LEN {
        return Err(AppError::InvalidRequest(
            "Team name is too long for a gateway order id".to_string(),
        ));
    }

    // Step 3: charge
    let charge = state
        .gateway
        .create_charge(&ChargeRequest {
            order_id: order_id.clone(),
            amount,
            currency: currency.clone(),
            method: request.method,
        })
        .await?;

    tracing::info!(
        team,
        order_id = %order_id,
        transaction_id = %charge.transaction_id,
        amount,
        "credit purchase started"
    );

    Ok(PurchaseResponse {
        order_id,
        amount,
        currency,
        charge,
    })
}

fn validate_method(method: &PaymentMethod) -> Result<(), AppError> {
    match method {
        PaymentMethod::BankTransfer { bank } if bank.trim().is_empty() => Err(
            AppError::InvalidRequest("Bank code is required".to_string()),
        ),
        PaymentMethod::Ewallet { channel }
            if !EWALLET_CHANNELS.contains(&channel.to_ascii_lowercase().as_str()) =>
        {
            Err(AppError::InvalidRequest(format!(
                "Unsupported e-wallet channel {channel:?}"
            )))
        }
        _ => Ok(()),
    }
}

/// Stored payment event, if it belongs to the team.
///
/// # Errors
///
/// `TransactionNotFound` when the event is unknown or another team's.
pub async fn get_payment(
    state: &AppState,
    team: &str,
    transaction_id: &str,
) -> Result<PaymentEventResponse, AppError> {
    state
        .store
        .find_event(transaction_id)
        .await?
        .filter(|e| e.team.as_deref() == Some(team))
        .map(PaymentEventResponse::from)
        .ok_or(AppError::TransactionNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_validation() {
        assert!(validate_method(&PaymentMethod::Qris).is_ok());
        assert!(
            validate_method(&PaymentMethod::BankTransfer {
                bank: "bca".to_string()
            })
            .is_ok()
        );
        assert!(
            validate_method(&PaymentMethod::BankTransfer {
                bank: " ".to_string()
            })
            .is_err()
        );
        assert!(
            validate_method(&PaymentMethod::Ewallet {
                channel: "GoPay".to_string()
            })
            .is_ok()
        );
        assert!(
            validate_method(&PaymentMethod::Ewallet {
                channel: "paypal".to_string()
            })
            .is_err()
        );
    }
}
