//! Midtrans Core API adapter.
//!
//! Every call authenticates with HTTP Basic (server key, empty password) and
//! is bounded by the configured timeout. Midtrans reports most failures with
//! HTTP 200 and a non-2xx `status_code` in the body, so the body decides.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::GatewayConfig;
use crate::gateway::{
    ChargeAction, ChargeRequest, ChargeResult, GatewayClient, GatewayError, PaymentMethod,
    StatusResult, VaNumber,
};
use crate::models::notification::{GatewayNotification, currency_exponent};

pub struct MidtransClient {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl MidtransClient {
    /// Build the client once per process.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

/// Subset of the Midtrans charge response we surface.
#[derive(Debug, Deserialize)]
struct ChargeBody {
    transaction_id: Option<String>,
    order_id: Option<String>,
    transaction_status: Option<String>,
    payment_type: Option<String>,
    #[serde(default)]
    va_numbers: Vec<VaNumber>,
    permata_va_number: Option<String>,
    bill_key: Option<String>,
    #[serde(default)]
    actions: Vec<ChargeAction>,
    expiry_time: Option<String>,
}

/// Gross amount in the major units Midtrans expects.
fn gross_amount(amount: i64, currency: &str) -> Value {
    match currency_exponent(currency) {
        0 => json!(amount),
        exp => json!(amount as f64 / 10f64.powi(exp as i32)),
    }
}

fn charge_body(request: &ChargeRequest) -> Value {
    let mut body = json!({
        "transaction_details": {
            "order_id": request.order_id,
            "gross_amount": gross_amount(request.amount, &request.currency),
        },
    });

    match &request.method {
        PaymentMethod::BankTransfer { bank } if bank.eq_ignore_ascii_case("mandiri") => {
            body["payment_type"] = json!("echannel");
            body["echannel"] = json!({
                "bill_info1": "Payment:",
                "bill_info2": "Prepaid credits",
            });
        }
        PaymentMethod::BankTransfer { bank } => {
            body["payment_type"] = json!("bank_transfer");
            body["bank_transfer"] = json!({ "bank": bank.to_ascii_lowercase() });
        }
        PaymentMethod::Ewallet { channel } => {
            body["payment_type"] = json!(channel.to_ascii_lowercase());
        }
        PaymentMethod::Qris => {
            body["payment_type"] = json!("qris");
        }
    }

    body
}

/// Pull the gateway's own error text out of a response body.
fn rejection(body: &Value, http_status: u16) -> GatewayError {
    let status_code = body
        .get("status_code")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| http_status.to_string());

    let mut messages: Vec<String> = body
        .get("validation_messages")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if messages.is_empty() {
        if let Some(message) = body.get("status_message").and_then(Value::as_str) {
            messages.push(message.to_string());
        }
    }

    GatewayError::Rejected {
        status_code,
        messages,
    }
}

fn is_success_code(body: &Value) -> bool {
    body.get("status_code")
        .and_then(Value::as_str)
        .is_none_or(|code| code.starts_with('2'))
}

#[async_trait]
impl GatewayClient for MidtransClient {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResult, GatewayError> {
        let response = self
            .client
            .post(format!("{}/charge", self.config.base_url))
            .basic_auth(&self.config.server_key, None::<&str>)
            .header("Accept", "application/json")
            .json(&charge_body(request))
            .send()
            .await?;

        let http_status = response.status().as_u16();
        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        if !(200..300).contains(&http_status) || !is_success_code(&body) {
            return Err(rejection(&body, http_status));
        }

        let charge: ChargeBody = serde_json::from_value(body.clone())
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let Some(transaction_id) = charge.transaction_id else {
            return Err(rejection(&body, http_status));
        };

        let mut va_numbers = charge.va_numbers;
        if let Some(number) = charge.permata_va_number {
            va_numbers.push(VaNumber {
                bank: "permata".to_string(),
                va_number: number,
            });
        }
        if let Some(bill_key) = charge.bill_key {
            va_numbers.push(VaNumber {
                bank: "mandiri".to_string(),
                va_number: bill_key,
            });
        }

        Ok(ChargeResult {
            transaction_id,
            order_id: charge.order_id.unwrap_or_else(|| request.order_id.clone()),
            transaction_status: charge.transaction_status.unwrap_or_default(),
            payment_type: charge.payment_type,
            va_numbers,
            actions: charge.actions,
            expiry_time: charge.expiry_time,
        })
    }

    async fn get_status(&self, transaction_id: &str) -> Result<StatusResult, GatewayError> {
        let response = self
            .client
            .get(format!("{}/{}/status", self.config.base_url, transaction_id))
            .basic_auth(&self.config.server_key, None::<&str>)
            .header("Accept", "application/json")
            .send()
            .await?;

        let http_status = response.status().as_u16();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        // Expired and denied transactions come back with 407 / 202 in the
        // body but still carry a transaction status.
        if !(200..300).contains(&http_status) || payload.get("transaction_status").is_none() {
            return Err(rejection(&payload, http_status));
        }

        let envelope: GatewayNotification = serde_json::from_value(payload.clone())
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        Ok(StatusResult { envelope, payload })
    }
}
