//! Team API key authentication for the `/api/v1` routes.
//!
//! A request is admitted when `Authorization: Bearer <key>` hashes to an
//! active key in the store; the key's team is attached for the handlers.
//! Anything else is a 401 before the handler runs.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{error::AppError, models::api_key::hash_api_key, state::AppState};

/// Authentication context attached to authenticated requests.
///
/// Handlers extract it with `Extension<AuthContext>` and scope every read
/// and write to `team`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// ID of the authenticated API key
    pub api_key_id: Uuid,

    /// Team the request acts for
    pub team: String,
}

/// Resolve the bearer key to an [`AuthContext`] or reject with
/// `InvalidApiKey`.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key_hash = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(hash_api_key)
        .ok_or(AppError::InvalidApiKey)?;

    let record = state
        .store
        .find_api_key(&key_hash)
        .await?
        .ok_or(AppError::InvalidApiKey)?;

    request.extensions_mut().insert(AuthContext {
        api_key_id: record.id,
        team: record.team,
    });

    Ok(next.run(request).await)
}
