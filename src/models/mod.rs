//! Data models representing database entities.
//!
//! This module contains all data structures that map to database tables,
//! plus the validated gateway notification envelope.

/// API key authentication model
pub mod api_key;
/// Invoices and their line items
pub mod invoice;
/// Immutable balance credits
pub mod ledger;
/// Gateway notification envelope
pub mod notification;
/// Payment events keyed by gateway transaction id
pub mod payment_event;
/// Credit purchase requests
pub mod purchase;
/// Teams and balances
pub mod team;
/// Raw webhook delivery log
pub mod webhook_delivery;

/// A stored enum column held a value this build does not know.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: String) -> Self {
        Self { kind, value }
    }
}
