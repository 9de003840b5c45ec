//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! The reconciliation engine and its leaves (normalizer, signature
//! verifier, team resolver) live here, together with the webhook, payment
//! and retry flows that feed it.

pub mod normalizer;
pub mod payment_service;
pub mod reconciliation;
pub mod retry;
pub mod signature;
pub mod team_resolver;
pub mod webhook_service;
