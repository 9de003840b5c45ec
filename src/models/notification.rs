//! Gateway notification envelope.
//!
//! The gateway posts the same JSON shape for webhooks and returns it from the
//! status endpoint, so both entry points parse into [`GatewayNotification`]
//! and are validated into a [`PaymentNotification`] before reaching the
//! reconciliation engine. Anything that does not fit is rejected here.
//!
//! # Example
//!
//! ```json
//! {
//!   "transaction_id": "9aed5972-5b6a-401e-894b-a32c91ed1a3a",
//!   "order_id": "CREDITS-alice-20250101120000",
//!   "transaction_status": "settlement",
//!   "status_code": "200",
//!   "gross_amount": "50000.00",
//!   "payment_type": "bank_transfer",
//!   "signature_key": "..."
//! }
//! ```

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AppError;
use crate::models::payment_event::PaymentStatus;
use crate::services::normalizer;

/// Notification body as sent by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayNotification {
    pub transaction_id: String,
    pub order_id: String,
    pub transaction_status: String,

    #[serde(default)]
    pub status_code: Option<String>,

    /// Decimal string (`"50000.00"`); some channels send a bare number.
    #[serde(deserialize_with = "string_or_number")]
    pub gross_amount: String,

    #[serde(default)]
    pub currency: Option<String>,

    #[serde(default)]
    pub payment_type: Option<String>,

    #[serde(default)]
    pub fraud_status: Option<String>,

    /// SHA-512 signature, when the gateway puts it in the body
    #[serde(default)]
    pub signature_key: Option<String>,
}

/// Accepts `"50000.00"` or `50000` and keeps the decimal text.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Amount::deserialize(deserializer)? {
        Amount::Text(s) => s,
        Amount::Number(n) => n.to_string(),
    })
}

/// A validated notification, ready for reconciliation.
#[derive(Debug, Clone)]
pub struct PaymentNotification {
    pub transaction_id: String,
    pub order_id: String,

    /// Canonical gateway status (`settlement` becomes `settle`)
    pub raw_status: String,

    pub payment_status: PaymentStatus,
    pub payment_type: Option<String>,

    /// Gross amount in minor units
    pub amount: i64,
    pub currency: String,

    /// Notification body, verbatim
    pub payload: serde_json::Value,
}

impl GatewayNotification {
    /// Parse a JSON value into an envelope.
    ///
    /// # Errors
    ///
    /// `MalformedNotification` if required fields are missing or mistyped.
    pub fn from_value(payload: &serde_json::Value) -> Result<Self, AppError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| AppError::MalformedNotification(e.to_string()))
    }
}

impl PaymentNotification {
    /// Validate an envelope and normalize its status.
    ///
    /// # Errors
    ///
    /// `MalformedNotification` when an identifier is blank or the amount is
    /// not a positive decimal representable in minor units of the currency.
    pub fn from_envelope(
        envelope: GatewayNotification,
        payload: serde_json::Value,
        default_currency: &str,
    ) -> Result<Self, AppError> {
        let transaction_id = envelope.transaction_id.trim().to_string();
        let order_id = envelope.order_id.trim().to_string();

        if transaction_id.is_empty() {
            return Err(AppError::MalformedNotification(
                "transaction_id is empty".to_string(),
            ));
        }
        if order_id.is_empty() {
            return Err(AppError::MalformedNotification(
                "order_id is empty".to_string(),
            ));
        }
        if envelope.transaction_status.trim().is_empty() {
            return Err(AppError::MalformedNotification(
                "transaction_status is empty".to_string(),
            ));
        }

        let currency = envelope
            .currency
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(default_currency)
            .to_ascii_uppercase();

        let amount = parse_minor_units(&envelope.gross_amount, &currency)
            .map_err(AppError::MalformedNotification)?;

        Ok(Self {
            transaction_id,
            order_id,
            raw_status: normalizer::canonical_status(&envelope.transaction_status),
            payment_status: normalizer::normalize_with_fraud(
                &envelope.transaction_status,
                envelope.fraud_status.as_deref(),
            ),
            payment_type: envelope.payment_type,
            amount,
            currency,
            payload,
        })
    }

    /// Parse and validate a raw webhook body.
    ///
    /// # Errors
    ///
    /// `MalformedNotification` if the body is not JSON or fails validation.
    pub fn from_body(body: &[u8], default_currency: &str) -> Result<Self, AppError> {
        let payload: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| AppError::MalformedNotification(e.to_string()))?;
        let envelope = GatewayNotification::from_value(&payload)?;
        Self::from_envelope(envelope, payload, default_currency)
    }
}

/// Number of minor-unit digits for a currency.
pub fn currency_exponent(currency: &str) -> u32 {
    match currency {
        "IDR" | "JPY" | "KRW" | "VND" => 0,
        _ => 2,
    }
}

/// Convert a decimal amount string into minor units.
///
/// `"50000.00"` in IDR is 50000; `"10.5"` in USD is 1050. Non-zero digits
/// beyond the currency's precision are rejected, as are zero and negative
/// amounts.
pub fn parse_minor_units(amount: &str, currency: &str) -> Result<i64, String> {
    let amount = amount.trim();
    let exponent = currency_exponent(currency) as usize;

    let (whole, fraction) = amount.split_once('.').unwrap_or((amount, ""));

    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("gross_amount {amount:?} is not a positive decimal"));
    }
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("gross_amount {amount:?} is not a positive decimal"));
    }

    let (kept, dropped) = fraction.split_at(fraction.len().min(exponent));
    if dropped.chars().any(|c| c != '0') {
        return Err(format!(
            "gross_amount {amount:?} has more precision than {currency} allows"
        ));
    }

    let digits = format!("{whole}{kept:0<exponent$}");
    let value: i64 = digits
        .parse()
        .map_err(|_| format!("gross_amount {amount:?} is out of range"))?;

    if value <= 0 {
        return Err(format!("gross_amount {amount:?} must be positive"));
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn idr_amount_drops_zero_fraction() {
        assert_eq!(parse_minor_units("50000.00", "IDR"), Ok(50000));
        assert_eq!(parse_minor_units("50000", "IDR"), Ok(50000));
    }

    #[test]
    fn usd_amount_is_converted_to_cents() {
        assert_eq!(parse_minor_units("10.5", "USD"), Ok(1050));
        assert_eq!(parse_minor_units("10.05", "USD"), Ok(1005));
        assert_eq!(parse_minor_units("3", "USD"), Ok(300));
    }

    #[test]
    fn amount_rejects_garbage_and_lost_precision() {
        assert!(parse_minor_units("", "IDR").is_err());
        assert!(parse_minor_units("-100", "IDR").is_err());
        assert!(parse_minor_units("12a", "IDR").is_err());
        assert!(parse_minor_units("0.00", "IDR").is_err());
        assert!(parse_minor_units("100.50", "IDR").is_err());
        assert!(parse_minor_units("99999999999999999999", "IDR").is_err());
    }

    #[test]
    fn body_with_numeric_amount_is_accepted() {
        let body = json!({
            "transaction_id": "TX1",
            "order_id": "CREDITS-alice-20250101",
            "transaction_status": "pending",
            "gross_amount": 50000
        });

        let n = PaymentNotification::from_body(body.to_string().as_bytes(), "IDR").unwrap();

        assert_eq!(n.amount, 50000);
        assert_eq!(n.currency, "IDR");
        assert_eq!(n.payment_status, PaymentStatus::Pending);
        assert_eq!(n.payload, body);
    }

    #[test]
    fn settlement_is_stored_as_settle() {
        let body = json!({
            "transaction_id": "TX1",
            "order_id": "CREDITS-alice-20250101",
            "transaction_status": "settlement",
            "gross_amount": "50000.00"
        });

        let n = PaymentNotification::from_body(body.to_string().as_bytes(), "IDR").unwrap();

        assert_eq!(n.raw_status, "settle");
        assert_eq!(n.payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn missing_fields_are_malformed() {
        let body = json!({ "order_id": "X", "transaction_status": "pending", "gross_amount": "1" });
        let err = PaymentNotification::from_body(body.to_string().as_bytes(), "IDR").unwrap_err();
        assert!(matches!(err, AppError::MalformedNotification(_)));

        let err = PaymentNotification::from_body(b"not json", "IDR").unwrap_err();
        assert!(matches!(err, AppError::MalformedNotification(_)));
    }

    #[test]
    fn blank_transaction_id_is_malformed() {
        let body = json!({
            "transaction_id": "  ",
            "order_id": "X",
            "transaction_status": "pending",
            "gross_amount": "1"
        });
        let err = PaymentNotification::from_body(body.to_string().as_bytes(), "IDR").unwrap_err();
        assert!(matches!(err, AppError::MalformedNotification(_)));
    }
}
