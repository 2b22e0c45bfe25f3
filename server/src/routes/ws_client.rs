//! Client WebSocket (spec §6, path `/<client_id>`): the per-browser
//! connection that carries `stdin`/`resize`/`attach`/`detach`/`title_set`
//! inbound and `output`/`session_updated`/... outbound.
//!
//! Mirrors the teacher's `handle_connection` shape (split socket, spawn an
//! outbound drain task, process inbound frames on the current task, clean up
//! on disconnect) generalized from a flat relay to per-session attach/detach
//! with visibility-aware broadcast.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::connection::{InboundMessage, OutboundMessage, SessionUpdateType};
use crate::session::RuntimeCommand;
use crate::state::AppContext;
use crate::users::UserIdentity;
use crate::{access, util};

pub async fn handle(
    ws: WebSocketUpgrade,
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Path(client_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run(socket, ctx, client_id, identity))
}

async fn run(socket: WebSocket, ctx: AppContext, client_id: String, identity: UserIdentity) {
    let (mut sink, mut stream) = socket.split();
    let (_tx, mut rx) = ctx.connections.register(client_id.clone(), identity.username.clone());

    let outbound_task: JoinHandle<()> = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(err) => {
                    tracing::warn!(%err, "failed to serialize outbound message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    ctx.connections.send_to_client(
        &client_id,
        OutboundMessage::AuthSuccess {
            username: identity.username.clone(),
        },
    );

    // Per-session output-forwarding tasks, keyed by session id so `detach`
    // can cancel the one it no longer needs.
    let output_tasks: Arc<DashMap<String, JoinHandle<()>>> = Arc::new(DashMap::new());

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => {
                if let Ok(inbound) = serde_json::from_str::<InboundMessage>(&text) {
                    handle_inbound(&ctx, &client_id, &identity, inbound, &output_tasks).await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    for entry in output_tasks.iter() {
        entry.value().abort();
    }
    outbound_task.abort();
    ctx.connections.unregister(&client_id);

    let affected = ctx.sessions.cleanup_client_sessions(&client_id);
    let users = ctx.users.read().await;
    for session_id in affected {
        if let Some(session) = ctx.sessions.get_session_including_terminated(&session_id) {
            ctx.connections
                .broadcast_with_visibility(OutboundMessage::session_updated(SessionUpdateType::Updated, session.summary()), &users);
        }
    }
}

async fn handle_inbound(
    ctx: &AppContext,
    client_id: &str,
    identity: &UserIdentity,
    msg: InboundMessage,
    output_tasks: &Arc<DashMap<String, JoinHandle<()>>>,
) {
    match msg {
        InboundMessage::Auth { .. } => {
            ctx.connections.send_to_client(
                client_id,
                OutboundMessage::AuthSuccess {
                    username: identity.username.clone(),
                },
            );
        }

        InboundMessage::Attach { session_id, since_offset } => {
            attach(ctx, client_id, identity, &session_id, since_offset, output_tasks).await;
        }

        InboundMessage::Detach { session_id } => {
            if let Some(session) = ctx.sessions.get_session(&session_id) {
                session.detach_client(client_id);
            }
            if let Some((_, task)) = output_tasks.remove(&session_id) {
                task.abort();
            }
        }

        InboundMessage::Stdin { session_id, data } => {
            let Some(session) = ctx.sessions.get_session(&session_id) else {
                return;
            };
            if !session.is_active() || !session.is_client_attached(client_id) || !session.is_interactive() {
                ctx.connections.send_to_client(
                    client_id,
                    OutboundMessage::Error {
                        message: "session is read-only or not attached".to_string(),
                    },
                );
                return;
            }
            let Ok(bytes) = util::decode_base64(&data) else {
                return;
            };
            let _ = session.command_tx.send(RuntimeCommand::Stdin {
                client_id: client_id.to_string(),
                data: bytes,
            });
        }

        InboundMessage::Resize { session_id, cols, rows } => {
            if let Some(session) = ctx.sessions.get_session(&session_id) {
                if session.is_client_attached(client_id) {
                    let _ = session.command_tx.send(RuntimeCommand::Resize { cols, rows });
                }
            }
        }

        InboundMessage::TitleSet { session_id, title } => {
            if let Some(session) = ctx.sessions.get_session(&session_id) {
                if session.is_client_attached(client_id) {
                    let _ = session.command_tx.send(RuntimeCommand::TitleSet { title: title.clone() });
                    session.set_title(Some(title));
                    let users = ctx.users.read().await;
                    ctx.connections
                        .broadcast_with_visibility(OutboundMessage::session_updated(SessionUpdateType::Updated, session.summary()), &users);
                }
            }
        }

        InboundMessage::Ping => {
            ctx.connections.send_to_client(client_id, OutboundMessage::Pong);
        }

        InboundMessage::Other => {}
    }
}

async fn attach(
    ctx: &AppContext,
    client_id: &str,
    identity: &UserIdentity,
    session_id: &str,
    since_offset: Option<u64>,
    output_tasks: &Arc<DashMap<String, JoinHandle<()>>>,
) {
    let Some(session) = ctx.sessions.get_session_including_terminated(session_id) else {
        ctx.connections.send_to_client(
            client_id,
            OutboundMessage::Error {
                message: format!("no such session {session_id}"),
            },
        );
        return;
    };
    let summary = session.summary();
    if !access::can_access_session(identity, &summary.created_by, summary.visibility) {
        ctx.connections.send_to_client(client_id, OutboundMessage::Error { message: "forbidden".to_string() });
        return;
    }

    session.attach_client(client_id);

    let (cols, rows) = session.dimensions();
    ctx.connections.send_to_client(
        client_id,
        OutboundMessage::Resize {
            session_id: session_id.to_string(),
            cols,
            rows,
        },
    );

    // Replay from `since_offset` (cheap resume) or from the start, then keep
    // forwarding live output. Subscribing before reading history avoids a
    // gap between "what we read" and "what we start receiving live".
    let mut live = session.output_tx.subscribe();
    let mut running_offset = session.history.total_len();
    let replay_from = since_offset.unwrap_or(0);
    if let Ok(replay) = session.history.read_range(replay_from, Some(running_offset)) {
        if !replay.is_empty() {
            ctx.connections
                .send_to_client(client_id, OutboundMessage::output(session_id, &replay, replay_from));
        }
    }

    let client_id_owned = client_id.to_string();
    let session_id_owned = session_id.to_string();
    let connections = Arc::clone(&ctx.connections);
    let history = Arc::clone(&session.history);
    let task = tokio::spawn(async move {
        loop {
            match live.recv().await {
                Ok(bytes) => {
                    let offset = running_offset;
                    running_offset += bytes.len() as u64;
                    if !connections.send_to_client(
                        &client_id_owned,
                        OutboundMessage::output(&session_id_owned, &bytes, offset),
                    ) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // Fell behind the broadcast channel's ring buffer; resync
                    // from the durable transcript rather than drop history.
                    let total = history.total_len();
                    if let Ok(catch_up) = history.read_range(running_offset, Some(total)) {
                        if !catch_up.is_empty()
                            && !connections.send_to_client(
                                &client_id_owned,
                                OutboundMessage::output(&session_id_owned, &catch_up, running_offset),
                            )
                        {
                            break;
                        }
                    }
                    running_offset = total;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    output_tasks.insert(session_id.to_string(), task);
}
