//! Payment Event Reconciler - Main Application Entry Point
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool and run migrations
//! 3. Build the gateway client, signature verifier and shared state
//! 4. Spawn the deferred reconciliation worker
//! 5. Start server on configured port

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use payment_event_reconciler::{
    config, db,
    gateway::midtrans::MidtransClient,
    routes,
    services::{retry::DeferredReconciliation, signature::SignatureVerifier},
    state::AppState,
    store::postgres::PgStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG (defaults to "info")
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    tracing::info!(sandbox = config.midtrans_sandbox, "Configuration loaded");

    if !config.require_signature {
        tracing::warn!("REQUIRE_SIGNATURE is off: unsigned notifications will be accepted");
    }

    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let gateway = MidtransClient::new(config.gateway())?;
    let state = AppState::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(gateway),
        SignatureVerifier::new(config.midtrans_server_key.clone()),
        config.webhook_policy(),
    );

    let worker = DeferredReconciliation {
        store: state.store.clone(),
        reconciler: state.reconciler.clone(),
        interval: Duration::from_secs(config.retry_interval_secs),
        max_attempts: config.retry_max_attempts,
        received_grace: Duration::from_secs(config.retry_received_grace_secs),
        default_currency: config.default_currency.clone(),
    };
    tokio::spawn(worker.run());
    tracing::info!(
        interval_secs = config.retry_interval_secs,
        max_attempts = config.retry_max_attempts,
        received_grace_secs = config.retry_received_grace_secs,
        "Deferred reconciliation worker started"
    );

    let app = routes::router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
