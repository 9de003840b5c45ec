mod common;

use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use payment_event_reconciler::{
    gateway::PaymentMethod,
    models::payment_event::PaymentStatus,
    routes,
    store::PaymentStore,
};

use common::{
    ALICE_KEY, BOB_KEY, StubGateway, app_state, authed, body, json_body, notification, reconciler,
    seeded_store,
};

#[tokio::test]
async fn health_reports_store_connected() {
    let store = seeded_store().await;
    let app = routes::router(app_state(&store, &StubGateway::new()));

    let response = app
        .oneshot(Request::get("/health").body(axum::body::Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "connected");
    assert_eq!(json["signature_required"], true);
}

#[tokio::test]
async fn api_requires_a_valid_key() {
    let store = seeded_store().await;
    let app = routes::router(app_state(&store, &StubGateway::new()));

    let response = app
        .clone()
        .oneshot(Request::get("/api/v1/balance").body(axum::body::Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"]["code"], "invalid_api_key");

    let response = app
        .oneshot(authed("GET", "/api/v1/balance", "not-a-key", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn balance_lists_the_teams_ledger() {
    let store = seeded_store().await;
    reconciler(&store)
        .reconcile(&notification("TX1", "CREDITS-alice-20250101", "settlement", "50000"))
        .await
        .unwrap();
    let app = routes::router(app_state(&store, &StubGateway::new()));

    let response = app
        .clone()
        .oneshot(authed("GET", "/api/v1/balance", ALICE_KEY, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["team"], "alice");
    assert_eq!(json["balance"], 50000);
    assert_eq!(json["currency"], "IDR");
    assert_eq!(json["transactions"].as_array().unwrap().len(), 1);
    assert_eq!(json["transactions"][0]["reference"], "TX1");

    let response = app
        .oneshot(authed("GET", "/api/v1/balance", BOB_KEY, None))
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["balance"], 0);
    assert!(json["transactions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn invoices_are_listed_with_items() {
    let store = seeded_store().await;
    reconciler(&store)
        .reconcile(&notification("TX1", "CREDITS-alice-20250101", "pending", "50000"))
        .await
        .unwrap();
    let app = routes::router(app_state(&store, &StubGateway::new()));

    let response = app
        .clone()
        .oneshot(authed("GET", "/api/v1/invoices", ALICE_KEY, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    let invoices = json.as_array().unwrap();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0]["status"], "unpaid");
    assert_eq!(invoices[0]["purpose"], "credit_purchase");
    assert_eq!(invoices[0]["amount"], 50000);
    assert_eq!(invoices[0]["items"][0]["reference_kind"], "payment_event");
    assert_eq!(invoices[0]["items"][0]["reference_id"], "TX1");

    let response = app
        .oneshot(authed("GET", "/api/v1/invoices", BOB_KEY, None))
        .await
        .unwrap();
    assert!(json_body(response).await.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn payment_is_visible_only_to_its_team() {
    let store = seeded_store().await;
    reconciler(&store)
        .reconcile(&notification("TX1", "CREDITS-alice-20250101", "pending", "50000"))
        .await
        .unwrap();
    let app = routes::router(app_state(&store, &StubGateway::new()));

    let response = app
        .clone()
        .oneshot(authed("GET", "/api/v1/payments/TX1", ALICE_KEY, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["transaction_id"], "TX1");
    assert_eq!(json["payment_status"], "pending");
    assert_eq!(json["amount"], 50000);

    let response = app
        .clone()
        .oneshot(authed("GET", "/api/v1/payments/TX1", BOB_KEY, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(authed("GET", "/api/v1/payments/TX404", ALICE_KEY, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_check_reconciles_a_settled_payment() {
    let store = seeded_store().await;
    let engine = reconciler(&store);
    engine
        .reconcile(&notification("TX1", "CREDITS-alice-20250101", "pending", "50000"))
        .await
        .unwrap();

    // The settlement webhook never arrived; the gateway knows better.
    let gateway = StubGateway::new();
    gateway.set_status(
        "TX1",
        body("TX1", "CREDITS-alice-20250101", "settlement", "50000.00"),
    );
    let app = routes::router(app_state(&store, &gateway));

    let response = app
        .clone()
        .oneshot(authed("POST", "/api/v1/payments/TX1/check", ALICE_KEY, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "paid");
    assert_eq!(json["previous_status"], "pending");
    assert_eq!(json["transition"], "transitioned_to_paid");
    assert!(
        json["effects"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e["kind"] == "credited")
    );
    assert_eq!(store.balance("alice").await, Some(50000));

    // Checking again is a no-op.
    let response = app
        .oneshot(authed("POST", "/api/v1/payments/TX1/check", ALICE_KEY, None))
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["transition"], "updated_no_transition");
    assert_eq!(store.ledger().await.len(), 1);
}

#[tokio::test]
async fn status_check_of_unknown_transaction_for_own_order() {
    let store = seeded_store().await;
    let gateway = StubGateway::new();
    gateway.set_status(
        "TX7",
        body("TX7", "CREDITS-alice-20250101", "settlement", "25000.00"),
    );
    let app = routes::router(app_state(&store, &gateway));

    let response = app
        .oneshot(authed("POST", "/api/v1/payments/TX7/check", ALICE_KEY, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let event = store.find_event("TX7").await.unwrap().unwrap();
    assert_eq!(event.payment_status, PaymentStatus::Paid);
    assert_eq!(store.balance("alice").await, Some(25000));
}

#[tokio::test]
async fn status_check_of_another_teams_transaction_is_not_found() {
    let store = seeded_store().await;
    reconciler(&store)
        .reconcile(&notification("TX1", "CREDITS-alice-20250101", "pending", "50000"))
        .await
        .unwrap();

    let gateway = StubGateway::new();
    gateway.set_status(
        "TX1",
        body("TX1", "CREDITS-alice-20250101", "settlement", "50000.00"),
    );
    gateway.set_status(
        "TX2",
        body("TX2", "CREDITS-alice-20250102", "settlement", "50000.00"),
    );
    let app = routes::router(app_state(&store, &gateway));

    // Known event of another team.
    let response = app
        .clone()
        .oneshot(authed("POST", "/api/v1/payments/TX1/check", BOB_KEY, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Unknown event whose order id belongs to another team.
    let response = app
        .oneshot(authed("POST", "/api/v1/payments/TX2/check", BOB_KEY, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    assert!(store.find_event("TX2").await.unwrap().is_none());
    assert!(store.ledger().await.is_empty());
    assert_eq!(
        store.find_event("TX1").await.unwrap().unwrap().payment_status,
        PaymentStatus::Pending
    );
}

#[tokio::test]
async fn gateway_rejection_on_check_changes_nothing() {
    let store = seeded_store().await;
    reconciler(&store)
        .reconcile(&notification("TX1", "CREDITS-alice-20250101", "pending", "50000"))
        .await
        .unwrap();

    let gateway = StubGateway::new();
    gateway.reject_with("401", &["Access denied due to unauthorized transaction"]);
    let app = routes::router(app_state(&store, &gateway));

    let response = app
        .oneshot(authed("POST", "/api/v1/payments/TX1/check", ALICE_KEY, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "gateway_error");
    assert_eq!(
        json["error"]["gateway_messages"],
        json!(["Access denied due to unauthorized transaction"])
    );
    assert_eq!(
        store.find_event("TX1").await.unwrap().unwrap().payment_status,
        PaymentStatus::Pending
    );
}

#[tokio::test]
async fn credit_purchase_starts_a_charge() {
    let store = seeded_store().await;
    let gateway = StubGateway::new();
    let app = routes::router(app_state(&store, &gateway));

    let request = json!({
        "amount": 50000,
        "method": { "type": "bank_transfer", "bank": "bca" }
    });
    let response = app
        .oneshot(authed("POST", "/api/v1/credits/purchases", ALICE_KEY, Some(&request)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = json_body(response).await;
    let order_id = json["order_id"].as_str().unwrap();
    assert!(order_id.starts_with("CREDITS-alice-"), "{order_id}");
    assert_eq!(json["amount"], 50000);
    assert_eq!(json["currency"], "IDR");
    assert_eq!(json["charge"]["va_numbers"][0]["bank"], "bca");

    let charges = gateway.charges();
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].order_id, order_id);
    assert_eq!(charges[0].amount, 50000);
    assert_eq!(charges[0].currency, "IDR");
    assert!(matches!(
        &charges[0].method,
        PaymentMethod::BankTransfer { bank } if bank == "bca"
    ));

    // Nothing is recorded until the gateway reports on the charge.
    assert!(store.events().await.is_empty());
    assert!(store.invoices().await.is_empty());
}

#[tokio::test]
async fn credit_purchase_accepts_string_amount_and_ewallet() {
    let store = seeded_store().await;
    let gateway = StubGateway::new();
    let app = routes::router(app_state(&store, &gateway));

    let request = json!({
        "amount": "10.50",
        "currency": "usd",
        "method": { "type": "ewallet", "channel": "gopay" }
    });
    let response = app
        .oneshot(authed("POST", "/api/v1/credits/purchases", BOB_KEY, Some(&request)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = json_body(response).await;
    assert_eq!(json["amount"], 1050);
    assert_eq!(json["currency"], "USD");
}

#[tokio::test]
async fn credit_purchase_validation() {
    let store = seeded_store().await;
    let gateway = StubGateway::new();
    let app = routes::router(app_state(&store, &gateway));

    let below_minimum = json!({
        "amount": "0.50",
        "currency": "USD",
        "method": { "type": "qris" }
    });
    let bad_channel = json!({
        "amount": 50000,
        "method": { "type": "ewallet", "channel": "paypal" }
    });
    let not_a_number = json!({
        "amount": "fifty",
        "method": { "type": "qris" }
    });

    for request in [below_minimum, bad_channel, not_a_number] {
        let response = app
            .clone()
            .oneshot(authed("POST", "/api/v1/credits/purchases", ALICE_KEY, Some(&request)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{request}");
        assert_eq!(json_body(response).await["error"]["code"], "invalid_request");
    }

    assert!(gateway.charges().is_empty());
}

#[tokio::test]
async fn credit_purchase_passes_on_gateway_messages() {
    let store = seeded_store().await;
    let gateway = StubGateway::new();
    gateway.reject_with("406", &["The request could not be completed due to a conflict"]);
    let app = routes::router(app_state(&store, &gateway));

    let request = json!({
        "amount": 50000,
        "method": { "type": "qris" }
    });
    let response = app
        .oneshot(authed("POST", "/api/v1/credits/purchases", ALICE_KEY, Some(&request)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = json_body(response).await;
    assert_eq!(
        json["error"]["gateway_messages"][0],
        "The request could not be completed due to a conflict"
    );
}
