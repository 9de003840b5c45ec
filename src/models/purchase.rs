//! Credit purchase request and response types.

use serde::{Deserialize, Serialize};

use crate::gateway::{ChargeResult, PaymentMethod};
use crate::models::notification::string_or_number;

/// Request body for `POST /api/v1/credits/purchases`.
///
/// ```json
/// {
///   "amount": "50000",
///   "method": { "type": "bank_transfer", "bank": "bca" }
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    /// Decimal amount in major units (string or number)
    #[serde(deserialize_with = "string_or_number")]
    pub amount: String,

    /// Defaults to the team's currency
    #[serde(default)]
    pub currency: Option<String>,

    pub method: PaymentMethod,
}

/// Response body for a started purchase.
///
/// No payment event exists yet; the gateway's first notification creates it.
#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub order_id: String,
    /// Minor units
    pub amount: i64,
    pub currency: String,
    pub charge: ChargeResult,
}
