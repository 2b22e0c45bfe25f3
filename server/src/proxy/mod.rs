//! Service Proxy (spec §4.8, §4.9): forwards HTTP and upgrade requests onto
//! a session's tunnel carrier, addressed by loopback port.

pub mod http;
pub mod httpmsg;
pub mod ratelimit;
pub mod upgrade;

pub use ratelimit::ProxyRateLimiter;

use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{CONNECTION, UPGRADE};
use axum::http::{HeaderMap, Method, Response};
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppContext;
use crate::users::UserIdentity;

/// Path params shared by both the HTTP and Upgrade proxy routes.
/// `suffix` is the wildcard tail after `:port`, always present (possibly
/// empty) because the route is registered with a trailing `/*suffix`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyPathParams {
    pub sid: String,
    pub port: u16,
    #[serde(default)]
    pub suffix: String,
}

/// Single entry point mounted at `ALL /api/sessions/:sid/service/:port/*suffix`
/// (spec §6): the route is registered once for every method, and this
/// dispatcher decides between a one-shot HTTP forward (§4.8) and an Upgrade
/// byte-bridge (§4.9) based on the `Connection`/`Upgrade` headers, since
/// axum routes on method+path, not on upgrade intent.
pub async fn dispatch(
    state: State<AppContext>,
    identity: Option<UserIdentity>,
    query: Query<upgrade::UpgradeQuery>,
    path: Path<ProxyPathParams>,
    method: Method,
    headers: HeaderMap,
    req: Request<Body>,
) -> Result<Response<Body>, AppError> {
    if is_upgrade_request(&headers) {
        return upgrade::handle(state, identity, query, path, method, headers, req).await;
    }

    let identity = identity.ok_or(AppError::AuthFailed)?;
    let uri = req.uri().clone();
    http::handle(state, identity, path, method, uri, headers, req.into_body()).await
}

fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let has_upgrade_header = headers.contains_key(UPGRADE);
    let connection_says_upgrade = headers
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"));
    has_upgrade_header && connection_says_upgrade
}
