//! Midtrans payment event reconciliation service.
//!
//! Ingests gateway notifications (webhooks and polled status checks) and
//! turns them into exactly-once balance credits and invoice transitions.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx, behind the [`store::PaymentStore`] trait
//! - **Gateway**: Midtrans Core API via reqwest, behind [`gateway::GatewayClient`]
//! - **Authentication**: team API keys with SHA-256 hashing; notifications
//!   are authenticated by their SHA-512 signature

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
