//! HTTP middleware.
//!
//! Only the `/api/v1` routes are wrapped; the gateway webhook carries its
//! own signature and `/health` is open.

/// Team API key authentication
pub mod auth;
