//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Calls into a service or the store
//! 3. Returns HTTP response (JSON, status code)

/// Invoices and balance
pub mod billing;
/// Credit purchase initiation
pub mod credits;
/// Service health
pub mod health;
/// Payment events and manual status checks
pub mod payments;
/// Gateway notifications
pub mod webhooks;
