//! Token refresh endpoint.

use axum::Json;
use axum::extract::State;
use serde::Deserialize;

use crate::error::{AppResult, SecurityError};
use crate::state::AppState;
use crate::token::TokenPair;

#[derive(Deserialize)]
pub struct RefreshRequest {
    refresh_token: String,
}

/// `POST /auth/refresh`: rotate a refresh token into a new pair.
///
/// The subject is re-resolved through the directory before issuance, so
/// deleted subjects cannot refresh and role changes take effect immediately.
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<TokenPair>> {
    if body.refresh_token.is_empty() {
        return Err(SecurityError::Validation(
            "refresh_token is required".to_string(),
        ));
    }

    let pair = state
        .codec
        .refresh_access_token(state.directory.as_ref(), &body.refresh_token)
        .await?;
    Ok(Json(pair))
}
