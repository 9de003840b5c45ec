//! HTTP router.

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::{handlers, middleware, state::AppState};

/// Build the full application router.
///
/// Public: `/health` and the gateway webhook. Everything under `/api/v1`
/// requires a team API key.
pub fn router(state: AppState) -> Router {
    let authenticated_routes = Router::new()
        .route(
            "/api/v1/payments/{transaction_id}",
            get(handlers::payments::get_payment),
        )
        .route(
            "/api/v1/payments/{transaction_id}/check",
            post(handlers::payments::check_payment),
        )
        .route(
            "/api/v1/credits/purchases",
            post(handlers::credits::create_purchase),
        )
        .route("/api/v1/invoices", get(handlers::billing::list_invoices))
        .route("/api/v1/balance", get(handlers::billing::get_balance))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/webhooks/midtrans",
            post(handlers::webhooks::midtrans_notification),
        )
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
