//! Service Proxy (HTTP), spec §4.8: one-shot request/response forwarding
//! onto a session's tunnel carrier.

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use super::httpmsg::{compose_request, is_hop_by_hop, ForwardedInfo, ResponseReader};
use super::ProxyPathParams;
use crate::access;
use crate::error::{AppError, AppResult};
use crate::state::AppContext;
use crate::users::UserIdentity;

pub async fn handle(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Path(params): Path<ProxyPathParams>,
    method: Method,
    uri: axum::http::Uri,
    headers: HeaderMap,
    body: Body,
) -> AppResult<Response<Body>> {
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();

    let resolved_id = ctx.sessions.resolve_id_from_alias_or_id(&params.sid);
    let session = ctx
        .sessions
        .get_session(&resolved_id)
        .ok_or_else(|| AppError::NotFound(format!("session {}", params.sid)))?;
    let summary = session.summary();
    if !access::can_access_session(&identity, &summary.created_by, summary.visibility) {
        return Err(AppError::Forbidden);
    }

    let carrier = ctx
        .tunnels
        .get(&resolved_id)
        .ok_or_else(|| AppError::ServiceUnavailable("no tunnel registered for session".into()))?;

    if !ctx.proxy_rate_limiter.check(&resolved_id) {
        return Err(AppError::RateLimited);
    }

    let mut stream = carrier.open_stream(params.port)?;

    // Bit-exact policy (spec §4.8): the prefix uses the raw alias as typed,
    // not the resolved session id, so upstream-relative links stay mountable.
    let prefix = format!("/api/sessions/{}/service/{}", params.sid, params.port);
    let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();
    let path = if params.suffix.is_empty() {
        format!("/{query}")
    } else {
        format!("/{}{query}", params.suffix)
    };
    let host_port = format!("127.0.0.1:{}", params.port);
    let forwarded = ForwardedInfo {
        proto: "http".to_string(),
        host: host_port.clone(),
        for_addr: identity.username.clone(),
        prefix,
    };

    let request_head = compose_request(&method, &path, &headers, &host_port, &forwarded);
    stream
        .write(Bytes::from(request_head))
        .map_err(|err| AppError::BadGateway(err.to_string()))?;

    let mut body_stream = body.into_data_stream();
    while let Some(chunk) = body_stream.next().await {
        let chunk = chunk.map_err(|err| AppError::BadGateway(err.to_string()))?;
        stream
            .write(chunk)
            .map_err(|err| AppError::BadGateway(err.to_string()))?;
    }

    let first_byte_timeout = Duration::from_secs(ctx.config.proxy_first_byte_timeout_secs);
    let mut reader = ResponseReader::new();
    let parsed = loop {
        let chunk = tokio::time::timeout(first_byte_timeout, stream.recv())
            .await
            .map_err(|_| AppError::BadGateway("upstream timed out before first byte".into()))?;
        let Some(chunk) = chunk else {
            return Err(AppError::BadGateway("upstream closed before sending a response".into()));
        };
        if let Some(parsed) = reader
            .feed(&chunk)
            .map_err(|err| AppError::BadGateway(err.to_string()))?
        {
            break parsed;
        }
    };

    let status = StatusCode::from_u16(parsed.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response_builder = Response::builder().status(status);
    for (name, value) in &parsed.headers {
        if is_hop_by_hop(name.as_str(), false) {
            continue;
        }
        response_builder = response_builder.header(name, value);
    }

    let (body_tx, body_rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(16);
    if !parsed.residual_body.is_empty() {
        let _ = body_tx.send(Ok(Bytes::from(parsed.residual_body))).await;
    }

    tokio::spawn(async move {
        while let Some(chunk) = stream.recv().await {
            if body_tx.send(Ok(chunk)).await.is_err() {
                break;
            }
        }
    });

    let response_body = Body::from_stream(ReceiverStream::new(body_rx));
    let response = response_builder
        .body(response_body)
        .map_err(|err| AppError::Internal(anyhow::anyhow!(err)))?;

    tracing::info!(
        request_id,
        session_id = %resolved_id,
        method = %method,
        path,
        status = status.as_u16(),
        duration_ms = started.elapsed().as_millis() as u64,
        "service proxy request completed"
    );

    Ok(response)
}
