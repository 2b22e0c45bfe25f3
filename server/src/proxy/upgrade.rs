//! Service Proxy (Upgrade), spec §4.9: a transparent byte bridge for
//! WebSocket (and other) Upgrade requests proxied through a tunnel stream.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, Response, StatusCode};
use bytes::Bytes;
use hyper::upgrade::OnUpgrade;

use super::httpmsg::compose_upgrade_request;
use super::ProxyPathParams;
use crate::access;
use crate::auth::token::AccessTokenKind;
use crate::error::AppError;
use crate::state::AppContext;
use crate::users::UserIdentity;

#[derive(serde::Deserialize)]
pub struct UpgradeQuery {
    pub token: Option<String>,
}

/// Access-checks and bridges an Upgrade request. `identity` comes from the
/// normal auth chain (§4.10) OR, additionally here, from a verified
/// `?token=` access token bound to `:sid` (§4.9).
pub async fn handle(
    State(ctx): State<AppContext>,
    identity: Option<UserIdentity>,
    axum::extract::Query(query): axum::extract::Query<UpgradeQuery>,
    Path(params): Path<ProxyPathParams>,
    method: Method,
    headers: HeaderMap,
    req: axum::extract::Request<Body>,
) -> Result<Response<Body>, AppError> {
    let resolved_id = ctx.sessions.resolve_id_from_alias_or_id(&params.sid);
    let session = ctx
        .sessions
        .get_session(&resolved_id)
        .ok_or_else(|| AppError::NotFound(format!("session {}", params.sid)))?;
    let summary = session.summary();

    let authorized_by_token = query
        .token
        .as_deref()
        .and_then(|t| ctx.tokens.verify_access_token(t))
        .is_some_and(|payload| payload.kind == AccessTokenKind::Tunnel && payload.session_id == resolved_id);

    if !authorized_by_token {
        let identity = identity.ok_or(AppError::AuthFailed)?;
        if !access::can_access_session(&identity, &summary.created_by, summary.visibility) {
            return Err(AppError::Forbidden);
        }
    }

    let carrier = ctx
        .tunnels
        .get(&resolved_id)
        .ok_or_else(|| AppError::ServiceUnavailable("no tunnel registered for session".into()))?;

    let mut stream = carrier.open_stream(params.port)?;

    let path = if params.suffix.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", params.suffix)
    };
    let host_port = format!("127.0.0.1:{}", params.port);
    let request_head = compose_upgrade_request(&method, &path, &headers, &host_port);
    stream
        .write(Bytes::from(request_head))
        .map_err(|err| AppError::BadGateway(err.to_string()))?;

    let on_upgrade = req
        .extensions()
        .get::<OnUpgrade>()
        .cloned()
        .ok_or_else(|| AppError::Invalid("request did not carry an upgrade".into()))?;

    tokio::spawn(async move {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(err) => {
                tracing::warn!(%err, "upgrade negotiation failed");
                return;
            }
        };
        let mut io = hyper_util::rt::TokioIo::new(upgraded);
        bridge(&mut io, &mut stream).await;
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .body(Body::empty())
        .map_err(|err| AppError::Internal(anyhow::anyhow!(err)))
}

/// Pipes bytes both directions between the upgraded client connection and
/// the tunnel stream until either side closes. Never parses the upstream's
/// frames — the proxy is a transparent bridge after the upgrade line (spec
/// §4.9's invariant).
async fn bridge<IO>(io: &mut IO, stream: &mut crate::tunnel::TunnelStream)
where
    IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut buf = [0u8; 8192];
    loop {
        tokio::select! {
            read = io.read(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stream.write(Bytes::copy_from_slice(&buf[..n])).is_err() {
                            break;
                        }
                    }
                }
            }
            chunk = stream.recv() => {
                match chunk {
                    Some(bytes) => {
                        if io.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    stream.end();
}
