#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{body::Body, http::Request, response::Response};
use serde_json::{Value, json};

use payment_event_reconciler::{
    config::WebhookPolicy,
    gateway::{
        ChargeRequest, ChargeResult, GatewayClient, GatewayError, StatusResult, VaNumber,
    },
    models::notification::{GatewayNotification, PaymentNotification},
    services::{reconciliation::Reconciler, signature::SignatureVerifier},
    state::AppState,
    store::{PaymentStore, memory::MemoryStore},
};

pub const SERVER_KEY: &str = "SB-Mid-server-test-key";
pub const ALICE_KEY: &str = "alice-api-key";
pub const BOB_KEY: &str = "bob-api-key";

/// Store with teams `alice`, `bob` and `acme-corp` (IDR) and API keys for
/// alice and bob.
pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.insert_team("alice", "IDR").await;
    store.insert_team("bob", "IDR").await;
    store.insert_team("acme-corp", "IDR").await;
    store.insert_api_key("alice", ALICE_KEY).await;
    store.insert_api_key("bob", BOB_KEY).await;
    Arc::new(store)
}

pub fn reconciler(store: &Arc<MemoryStore>) -> Reconciler {
    let store: Arc<dyn PaymentStore> = store.clone();
    Reconciler::new(store)
}

pub fn app_state(store: &Arc<MemoryStore>, gateway: &Arc<StubGateway>) -> AppState {
    app_state_with_policy(store, gateway, WebhookPolicy::default())
}

pub fn app_state_with_policy(
    store: &Arc<MemoryStore>,
    gateway: &Arc<StubGateway>,
    policy: WebhookPolicy,
) -> AppState {
    let store: Arc<dyn PaymentStore> = store.clone();
    let gateway: Arc<dyn GatewayClient> = gateway.clone();
    AppState::new(store, gateway, SignatureVerifier::new(SERVER_KEY), policy)
}

fn status_code_for(status: &str) -> &'static str {
    match status {
        "capture" | "settlement" | "settle" => "200",
        "pending" => "201",
        "deny" => "202",
        "expire" => "407",
        _ => "200",
    }
}

/// Unsigned notification body.
pub fn body(transaction_id: &str, order_id: &str, status: &str, gross_amount: &str) -> Value {
    json!({
        "transaction_id": transaction_id,
        "order_id": order_id,
        "transaction_status": status,
        "status_code": status_code_for(status),
        "gross_amount": gross_amount,
        "currency": "IDR",
        "payment_type": "bank_transfer",
        "transaction_time": "2025-01-01 12:00:00"
    })
}

/// Add the `signature_key` the gateway would send.
pub fn sign(mut body: Value) -> Value {
    let verifier = SignatureVerifier::new(SERVER_KEY);
    let signature = verifier.expected_signature(
        body["order_id"].as_str().unwrap(),
        body["status_code"].as_str().unwrap(),
        body["gross_amount"].as_str().unwrap(),
    );
    body["signature_key"] = json!(signature);
    body
}

pub fn notification(
    transaction_id: &str,
    order_id: &str,
    status: &str,
    gross_amount: &str,
) -> PaymentNotification {
    let body = body(transaction_id, order_id, status, gross_amount);
    PaymentNotification::from_body(body.to_string().as_bytes(), "IDR").unwrap()
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn authed(method: &str, uri: &str, api_key: &str, body: Option<&Value>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {api_key}"))
        .body(match body {
            Some(b) => Body::from(b.to_string()),
            None => Body::empty(),
        })
        .unwrap()
}

pub async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Gateway double: canned status responses, recorded charges, and an
/// optional rejection applied to every call.
#[derive(Default)]
pub struct StubGateway {
    statuses: Mutex<HashMap<String, Value>>,
    rejection: Mutex<Option<(String, Vec<String>)>>,
    charges: Mutex<Vec<ChargeRequest>>,
}

impl StubGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_status(&self, transaction_id: &str, payload: Value) {
        self.statuses
            .lock()
            .unwrap()
            .insert(transaction_id.to_string(), payload);
    }

    pub fn reject_with(&self, status_code: &str, messages: &[&str]) {
        *self.rejection.lock().unwrap() = Some((
            status_code.to_string(),
            messages.iter().map(|m| m.to_string()).collect(),
        ));
    }

    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().unwrap().clone()
    }

    fn rejected(&self) -> Option<GatewayError> {
        self.rejection
            .lock()
            .unwrap()
            .clone()
            .map(|(status_code, messages)| GatewayError::Rejected {
                status_code,
                messages,
            })
    }
}

#[async_trait]
impl GatewayClient for StubGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResult, GatewayError> {
        if let Some(err) = self.rejected() {
            return Err(err);
        }
        self.charges.lock().unwrap().push(request.clone());

        Ok(ChargeResult {
            transaction_id: format!("stub-{}", request.order_id),
            order_id: request.order_id.clone(),
            transaction_status: "pending".to_string(),
            payment_type: Some("bank_transfer".to_string()),
            va_numbers: vec![VaNumber {
                bank: "bca".to_string(),
                va_number: "12345678901".to_string(),
            }],
            actions: Vec::new(),
            expiry_time: Some("2025-01-02 12:00:00".to_string()),
        })
    }

    async fn get_status(&self, transaction_id: &str) -> Result<StatusResult, GatewayError> {
        if let Some(err) = self.rejected() {
            return Err(err);
        }
        let payload = self
            .statuses
            .lock()
            .unwrap()
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| GatewayError::Rejected {
                status_code: "404".to_string(),
                messages: vec!["Transaction doesn't exist.".to_string()],
            })?;
        let envelope = GatewayNotification::from_value(&payload)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        Ok(StatusResult { envelope, payload })
    }
}
