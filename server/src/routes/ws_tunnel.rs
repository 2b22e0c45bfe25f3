//! Tunnel carrier WebSocket (spec §4.7/§6, path `/api/sessions/:sid/tunnel`):
//! the in-session helper process opens this socket once and multiplexes
//! every reverse-tunneled service connection for that session over it.
//!
//! Access is gated by a short-lived access token (query `token`) rather than
//! the session cookie, mirroring the teacher's token-bound upgrade pattern
//! generalized here to check the token's `session_id` against the path's
//! `:sid` so a token minted for one session can never attach another's
//! carrier (spec §4.2/§4.7).

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use tokio::sync::mpsc;

use crate::auth::AccessTokenKind;
use crate::state::AppContext;

pub async fn handle(
    ws: WebSocketUpgrade,
    State(ctx): State<AppContext>,
    Path(session_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let token = params.get("token").cloned();
    let Some(payload) = token.as_deref().and_then(|t| ctx.tokens.verify_access_token(t)) else {
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    };
    if payload.kind != AccessTokenKind::Tunnel || payload.session_id != session_id {
        return axum::http::StatusCode::FORBIDDEN.into_response();
    }
    let Some(session) = ctx.sessions.get_session(&session_id) else {
        return axum::http::StatusCode::NOT_FOUND.into_response();
    };
    if !session.is_active() {
        return axum::http::StatusCode::GONE.into_response();
    }

    ws.on_upgrade(move |socket| run(socket, ctx, session_id))
}

async fn run(socket: axum::extract::ws::WebSocket, ctx: AppContext, session_id: String) {
    let (mut sink, mut stream) = futures::StreamExt::split(socket);
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    let carrier = ctx.tunnels.register(&session_id, outbound_tx);

    let writer_task = tokio::spawn(async move {
        use futures::SinkExt;
        while let Some(msg) = outbound_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = futures::StreamExt::next(&mut stream).await {
        match msg {
            Message::Binary(data) => carrier.dispatch_incoming_binary(data),
            Message::Text(text) => carrier.dispatch_incoming_text(&text),
            Message::Close(_) => break,
            _ => {}
        }
    }

    carrier.teardown();
    ctx.tunnels.unregister_if_current(&session_id, &carrier);
    writer_task.abort();
}
