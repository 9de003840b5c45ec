//! Liveness check.

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    /// Whether unsigned notifications are refused
    pub signature_required: bool,
    pub timestamp: DateTime<Utc>,
}

/// `GET /health`. A failed store ping surfaces as the usual 500 error body.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    state.store.ping().await?;

    Ok(Json(HealthResponse {
        status: "healthy",
        database: "connected",
        signature_required: state.policy.require_signature,
        timestamp: Utc::now(),
    }))
}
