//! Payment gateway seam.
//!
//! The reconciliation engine only needs two calls from the gateway: create a
//! charge for a credit purchase and fetch the current status of a
//! transaction. [`GatewayClient`] abstracts both so handlers can be tested
//! against a stub; [`midtrans::MidtransClient`] is the production adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::notification::GatewayNotification;

pub mod midtrans;

/// How the team wants to pay for a credit purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Virtual account at `bank` (`bca`, `bni`, `bri`, `permata`, `mandiri`, ...)
    BankTransfer { bank: String },
    /// E-wallet `channel` (`gopay`, `shopeepay`)
    Ewallet { channel: String },
    Qris,
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub order_id: String,
    /// Minor units
    pub amount: i64,
    pub currency: String,
    pub method: PaymentMethod,
}

/// Virtual account issued for a bank transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaNumber {
    pub bank: String,
    pub va_number: String,
}

/// Follow-up action for e-wallet and QRIS charges (deeplink, QR image, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeAction {
    pub name: String,
    pub method: String,
    pub url: String,
}

/// Accepted charge, as returned to the team.
#[derive(Debug, Clone, Serialize)]
pub struct ChargeResult {
    pub transaction_id: String,
    pub order_id: String,
    pub transaction_status: String,
    pub payment_type: Option<String>,
    pub va_numbers: Vec<VaNumber>,
    pub actions: Vec<ChargeAction>,
    pub expiry_time: Option<String>,
}

/// Current gateway view of one transaction.
#[derive(Debug, Clone)]
pub struct StatusResult {
    pub envelope: GatewayNotification,
    /// Response body, verbatim
    pub payload: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The gateway answered and refused. `messages` are its own words.
    #[error("gateway rejected the request with status {status_code}")]
    Rejected {
        status_code: String,
        messages: Vec<String>,
    },

    #[error("gateway request timed out")]
    Timeout,

    #[error("gateway unreachable: {0}")]
    Transport(String),

    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Messages to show the calling team.
    pub fn messages(&self) -> Vec<String> {
        match self {
            GatewayError::Rejected { messages, .. } => messages.clone(),
            other => vec![other.to_string()],
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResult, GatewayError>;

    async fn get_status(&self, transaction_id: &str) -> Result<StatusResult, GatewayError>;
}
