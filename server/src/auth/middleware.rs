//! Router & Auth Middleware (spec §4.10): resolves request identity through
//! a fixed precedence chain and attaches it to the request's extensions for
//! downstream extractors/handlers.

use axum::body::Body;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE, WWW_AUTHENTICATE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;

use super::token::{AccessTokenKind, SessionCookiePayload};
use crate::error::AppError;
use crate::state::AppContext;
use crate::users::UserIdentity;

const COOKIE_NAME: &str = "ts_session";

impl<S> FromRequestParts<S> for UserIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserIdentity>()
            .cloned()
            .ok_or(AppError::AuthFailed)
    }
}

enum Resolution {
    Plain(UserIdentity),
    SetCookie(UserIdentity, String),
}

pub async fn auth_middleware(State(ctx): State<AppContext>, mut req: Request<Body>, next: Next) -> Response {
    let headers = req.headers().clone();
    let query_token = req.uri().query().and_then(|q| query_param(q, "token"));
    match resolve(&ctx, &headers, query_token).await {
        Ok(Resolution::Plain(identity)) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Ok(Resolution::SetCookie(identity, cookie_value)) => {
            req.extensions_mut().insert(identity);
            let mut response = next.run(req).await;
            if let Ok(value) = HeaderValue::from_str(&cookie_value) {
                response.headers_mut().insert(SET_COOKIE, value);
            }
            response
        }
        Err(()) => unauthorized(&headers),
    }
}

async fn resolve(ctx: &AppContext, headers: &HeaderMap, query_token: Option<String>) -> Result<Resolution, ()> {
    if ctx.config.auth_disabled && find_basic_auth(headers).is_none() {
        let identity = ctx.users.read().await.resolve_identity(&ctx.config.default_username);
        return Ok(Resolution::Plain(identity));
    }

    // 1. `token` query or `x-session-token` header, bound to an active session.
    if let Some(token) = query_token.or_else(|| token_from_request(headers)) {
        if let Some(payload) = ctx.tokens.verify_access_token(&token) {
            if matches!(payload.kind, AccessTokenKind::Session | AccessTokenKind::Tunnel) {
                if let Some(session) = ctx.sessions.get_session(&payload.session_id) {
                    let owner = session.summary().created_by;
                    let identity = ctx.users.read().await.resolve_identity(&owner);
                    return Ok(Resolution::Plain(identity));
                }
            }
        }
    }

    // 2. Session cookie.
    if let Some(cookie_value) = cookie_from_request(headers) {
        if let Some(payload) = ctx.tokens.verify_session_cookie(&cookie_value) {
            let identity = ctx.users.read().await.resolve_identity(&payload.username);
            let refreshed = sign_session_cookie(ctx, &payload.username, headers);
            return Ok(Resolution::SetCookie(identity, refreshed));
        }
    }

    // 3. HTTP Basic.
    if let Some((username, password)) = find_basic_auth(headers) {
        let verified = ctx.users.read().await.verify_basic_auth(&username, &password);
        if verified {
            let identity = ctx.users.read().await.resolve_identity(&username);
            let cookie_value = sign_session_cookie(ctx, &username, headers);
            return Ok(Resolution::SetCookie(identity, cookie_value));
        }
    }

    Err(())
}

/// Whether this request terminated as (or is fronted by a proxy claiming)
/// HTTPS, per spec §4.2's cookie `SameSite`/`Secure` policy.
fn is_https_request(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or("").trim().eq_ignore_ascii_case("https"))
        .unwrap_or(false)
}

fn sign_session_cookie(ctx: &AppContext, username: &str, headers: &HeaderMap) -> String {
    let iat = super::token::now_secs();
    let payload = SessionCookiePayload {
        username: username.to_string(),
        iat,
        exp: iat + ctx.config.cookie_ttl_secs,
    };
    let token = ctx.tokens.sign_session_cookie(&payload);
    let same_site = if is_https_request(headers) {
        "SameSite=None; Secure"
    } else {
        "SameSite=Lax"
    };
    format!(
        "{COOKIE_NAME}={token}; Path=/; HttpOnly; {same_site}; Max-Age={}",
        ctx.config.cookie_ttl_secs
    )
}

fn token_from_request(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-session-token")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn cookie_from_request(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let pair = pair.trim();
        let (name, value) = pair.split_once('=')?;
        (name == COOKIE_NAME).then(|| value.to_string())
    })
}

fn find_basic_auth(headers: &HeaderMap) -> Option<(String, String)> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = raw.strip_prefix("Basic ")?;
    let decoded = B64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn unauthorized(headers: &HeaderMap) -> Response {
    let no_prompt = headers
        .get("x-no-auth-prompt")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "1")
        .unwrap_or(false);

    let mut response = (StatusCode::UNAUTHORIZED, "authentication required").into_response();
    if !no_prompt {
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"termhub\""));
    }
    response
}
