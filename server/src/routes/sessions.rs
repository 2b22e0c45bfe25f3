//! Session CRUD (spec §6): `/api/sessions*`. Creation resolves either a
//! template id (via the Workspace/Template Adapter) or a direct command,
//! then hands off to the Session Store, the single writer of record.

use std::collections::HashMap;
use std::path::PathBuf;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::access;
use crate::connection::{OutboundMessage, SessionUpdateType};
use crate::error::{AppError, AppResult};
use crate::session::{CreateSessionOptions, IsolationMode, SessionSummary, Visibility};
use crate::state::AppContext;
use crate::users::UserIdentity;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub template_id: Option<String>,
    #[serde(default)]
    pub template_parameters: HashMap<String, String>,
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    pub workspace: Option<String>,
    pub alias: Option<String>,
    pub title: Option<String>,
    #[serde(default = "default_interactive")]
    pub interactive: bool,
    #[serde(default = "default_show_in_sidebar")]
    pub show_in_sidebar: bool,
    pub parent_session_id: Option<String>,
    pub child_tab_type: Option<String>,
}

fn default_interactive() -> bool {
    true
}

fn default_show_in_sidebar() -> bool {
    true
}

pub async fn list(State(ctx): State<AppContext>, identity: UserIdentity) -> Json<Vec<SessionSummary>> {
    let visible: Vec<SessionSummary> = ctx
        .sessions
        .get_all_sessions()
        .into_iter()
        .map(|s| s.summary())
        .filter(|s| access::can_access_session(&identity, &s.created_by, s.visibility))
        .collect();
    Json(visible)
}

pub async fn create(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Json(req): Json<CreateSessionRequest>,
) -> AppResult<Json<SessionSummary>> {
    let (command, args, env, cwd, isolation_mode) = if let Some(template_id) = &req.template_id {
        let resolved = ctx.templates.resolve(template_id, &req.template_parameters)?;
        (resolved.command, resolved.args, resolved.env, resolved.cwd, resolved.isolation_mode)
    } else {
        let command = req
            .command
            .clone()
            .ok_or_else(|| AppError::Invalid("either template_id or command is required".into()))?;
        (
            command,
            req.args.clone(),
            req.env.clone(),
            req.cwd.clone().unwrap_or_else(|| PathBuf::from(".")),
            IsolationMode::None,
        )
    };

    let options = CreateSessionOptions {
        command,
        args,
        cwd,
        env,
        created_by: identity.username.clone(),
        visibility: req.visibility.unwrap_or(Visibility::Private),
        workspace: req.workspace.clone(),
        alias: req.alias.clone(),
        title: req.title.clone(),
        template_id: req.template_id.clone(),
        template_parameters: req.template_parameters.clone(),
        isolation_mode,
        container_name: None,
        interactive: req.interactive,
        parent_session_id: req.parent_session_id.clone(),
        child_tab_type: req.child_tab_type.clone(),
        show_in_sidebar: req.show_in_sidebar,
    };

    let session = ctx
        .sessions
        .create_session(options, ctx.termination_tx.clone())
        .map_err(AppError::Internal)?;
    let summary = session.summary();

    let users = ctx.users.read().await;
    ctx.connections
        .broadcast_with_visibility(OutboundMessage::session_updated(SessionUpdateType::Created, summary.clone()), &users);

    Ok(Json(summary))
}

pub async fn get_one(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Path(id): Path<String>,
) -> AppResult<Json<SessionSummary>> {
    let resolved = ctx.sessions.resolve_id_from_alias_or_id(&id);
    let session = ctx
        .sessions
        .get_session_including_terminated(&resolved)
        .ok_or_else(|| AppError::NotFound(format!("session {id}")))?;
    let summary = session.summary();
    if !access::can_access_session(&identity, &summary.created_by, summary.visibility) {
        return Err(AppError::Forbidden);
    }
    Ok(Json(summary))
}

pub async fn terminate(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let resolved = ctx.sessions.resolve_id_from_alias_or_id(&id);
    let session = ctx
        .sessions
        .get_session(&resolved)
        .ok_or_else(|| AppError::NotFound(format!("session {id}")))?;
    let summary = session.summary();
    if summary.created_by != identity.username && !identity.has_permission("manage_all_sessions") {
        return Err(AppError::Forbidden);
    }
    ctx.sessions.terminate_session(&resolved)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub since_offset: Option<u64>,
}

/// Streams the raw transcript, honoring `Range: bytes=start-end` (preferred)
/// or `?since_offset=N` (spec §6). Unsatisfiable ranges are clamped rather
/// than rejected — history is a convenience view, not a strict byte server.
///
/// Activity markers (spec §4.5(a)) falling in `[start, end)` ride along as
/// the `x-activity-markers` response header, a JSON array of `{offset, kind,
/// at_ms}`. HTTP delivers headers before the body, so a client always has
/// the markers in hand before the bytes they precede arrive.
pub async fn history_raw(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let resolved = ctx.sessions.resolve_id_from_alias_or_id(&id);
    let session = ctx
        .sessions
        .get_session_including_terminated(&resolved)
        .ok_or_else(|| AppError::NotFound(format!("session {id}")))?;
    let summary = session.summary();
    if !access::can_access_session(&identity, &summary.created_by, summary.visibility) {
        return Err(AppError::Forbidden);
    }

    let total = session.history.total_len();
    let (start, end) = parse_range(&headers, query.since_offset, total);
    let bytes = session
        .history
        .read_range(start, Some(end))
        .map_err(|err| AppError::Internal(anyhow::anyhow!(err)))?;
    let markers: Vec<_> = session
        .history
        .markers_since(start)
        .into_iter()
        .filter(|m| m.offset < end)
        .collect();
    let markers_json = serde_json::to_string(&markers).unwrap_or_else(|_| "[]".to_string());

    let mut response = (StatusCode::OK, bytes).into_response();
    response
        .headers_mut()
        .insert(axum::http::header::CONTENT_TYPE, "application/octet-stream".parse().unwrap());
    response.headers_mut().insert(
        axum::http::header::CONTENT_RANGE,
        format!("bytes {start}-{}/{total}", end.saturating_sub(1)).parse().unwrap(),
    );
    if let Ok(value) = axum::http::HeaderValue::from_str(&markers_json) {
        response.headers_mut().insert("x-activity-markers", value);
    }
    Ok(response)
}

fn parse_range(headers: &HeaderMap, since_offset: Option<u64>, total: u64) -> (u64, u64) {
    if let Some(raw) = headers.get(axum::http::header::RANGE).and_then(|v| v.to_str().ok()) {
        if let Some(spec) = raw.strip_prefix("bytes=") {
            if let Some((start_s, end_s)) = spec.split_once('-') {
                let start: u64 = start_s.parse().unwrap_or(0);
                let end: u64 = if end_s.is_empty() {
                    total
                } else {
                    end_s.parse::<u64>().map(|e| e + 1).unwrap_or(total)
                };
                return (start.min(total), end.min(total).max(start.min(total)));
            }
        }
    }
    let start = since_offset.unwrap_or(0).min(total);
    (start, total)
}

#[derive(Debug, Deserialize)]
pub struct RenameAliasRequest {
    pub alias: Option<String>,
}

pub async fn rename_alias(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Path(id): Path<String>,
    Json(req): Json<RenameAliasRequest>,
) -> AppResult<StatusCode> {
    let resolved = ctx.sessions.resolve_id_from_alias_or_id(&id);
    require_owner_or_manager(&ctx, &identity, &resolved).await?;
    ctx.sessions.rename_alias(&resolved, req.alias)?;
    broadcast_update(&ctx, &resolved).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct UpdateVisibilityRequest {
    pub visibility: Visibility,
}

pub async fn update_visibility(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Path(id): Path<String>,
    Json(req): Json<UpdateVisibilityRequest>,
) -> AppResult<StatusCode> {
    let resolved = ctx.sessions.resolve_id_from_alias_or_id(&id);
    let session = require_owner_or_manager(&ctx, &identity, &resolved).await?;
    session.set_visibility(req.visibility);
    broadcast_update(&ctx, &resolved).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct UpdateTitleRequest {
    pub title: Option<String>,
}

pub async fn update_title(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Path(id): Path<String>,
    Json(req): Json<UpdateTitleRequest>,
) -> AppResult<StatusCode> {
    let resolved = ctx.sessions.resolve_id_from_alias_or_id(&id);
    let session = require_owner_or_manager(&ctx, &identity, &resolved).await?;
    session.set_title(req.title);
    broadcast_update(&ctx, &resolved).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ReorderWorkspaceRequest {
    pub workspace: String,
    pub ordered_ids: Vec<String>,
}

/// Applies new `workspace_order` values and broadcasts `sessions_reordered`
/// (spec §4.11) to the caller's own connections.
pub async fn reorder_workspace(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Json(req): Json<ReorderWorkspaceRequest>,
) -> AppResult<StatusCode> {
    let applied = ctx.sessions.reorder_workspace(&req.workspace, &req.ordered_ids);
    let users = ctx.users.read().await;
    ctx.connections.broadcast_with_visibility(
        OutboundMessage::SessionsReordered {
            user: identity.username.clone(),
            workspace: req.workspace,
            order: applied,
        },
        &users,
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn require_owner_or_manager(
    ctx: &AppContext,
    identity: &UserIdentity,
    session_id: &str,
) -> AppResult<std::sync::Arc<crate::session::Session>> {
    let session = ctx
        .sessions
        .get_session(session_id)
        .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
    let summary = session.summary();
    if summary.created_by != identity.username && !identity.has_permission("manage_all_sessions") {
        return Err(AppError::Forbidden);
    }
    Ok(session)
}

async fn broadcast_update(ctx: &AppContext, session_id: &str) {
    if let Some(session) = ctx.sessions.get_session_including_terminated(session_id) {
        let users = ctx.users.read().await;
        ctx.connections
            .broadcast_with_visibility(OutboundMessage::session_updated(SessionUpdateType::Updated, session.summary()), &users);
    }
}
