//! `POST /api/user/reset-password` (spec §6): gated by the `password_reset_enabled`
//! feature flag, requires Basic auth of the current user, rejects password
//! reuse, and persists a new PBKDF2-SHA256 hash.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::Deserialize;

use crate::auth::password;
use crate::error::{AppError, AppResult};
use crate::state::AppContext;
use crate::users::UserIdentity;

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub new_password: String,
}

pub async fn reset_password(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    headers: HeaderMap,
    Json(req): Json<ResetPasswordRequest>,
) -> AppResult<StatusCode> {
    if !identity.has_feature("password_reset_enabled") {
        return Err(AppError::Forbidden);
    }

    let (_, current_password) = basic_auth_credentials(&headers).ok_or(AppError::AuthFailed)?;

    let mut users = ctx.users.write().await;
    let record = users
        .get_user(&identity.username)
        .ok_or_else(|| AppError::NotFound(format!("user {}", identity.username)))?;

    if !password::verify_password(&current_password, &record.password_hash) {
        return Err(AppError::AuthFailed);
    }
    if password::verify_password(&req.new_password, &record.password_hash) {
        return Err(AppError::Invalid("new password must differ from the current password".into()));
    }

    let new_hash = password::hash_password(&req.new_password);
    users.set_password_hash(&identity.username, new_hash);
    users
        .save(&ctx.config.users_path())
        .map_err(AppError::Internal)?;

    Ok(StatusCode::NO_CONTENT)
}

fn basic_auth_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let raw = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = raw.strip_prefix("Basic ")?;
    let decoded = B64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}
