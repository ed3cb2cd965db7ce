//! Authentication routes

use axum::{extract::State, Json};
use collabsphere_shared::Identity;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_USERNAME_LEN: usize = 64;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: Identity,
    pub expires_in: i64,
}

/// Log in by username, creating the user on first login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(ApiError::Validation("username is required".to_string()));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(ApiError::Validation(format!(
            "username must be at most {MAX_USERNAME_LEN} characters"
        )));
    }

    let identity = state.store.find_or_create_user(username).await?;
    let token = state.jwt.generate_token(&identity)?;

    tracing::info!(user_id = %identity.id, username = %identity.username, "login: Token issued");

    Ok(Json(LoginResponse {
        token,
        user: identity,
        expires_in: state.jwt.expiry_seconds(),
    }))
}
