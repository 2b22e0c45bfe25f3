//! Container ops (spec §6, §1): `sandbox_login`/`terminate_containers`
//! permission-gated routes over sessions whose `isolation_mode = container`.
//!
//! The actual `podman`/`docker exec` runtime adapter is an explicit
//! external collaborator (spec §1): "spawning processes, wiring stdio,
//! running `podman`/`docker exec`" is out of scope for this repo. These
//! handlers operate purely on the Session Store's record of which sessions
//! are container-isolated; the stop/terminate-all handlers log the
//! would-be runtime call rather than shelling out, the same boundary the
//! Session Runtime's termination callback already draws (spec §4.5(c)).

use std::collections::HashMap;
use std::path::PathBuf;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::session::{CreateSessionOptions, IsolationMode, SessionSummary, Visibility};
use crate::state::AppContext;
use crate::users::UserIdentity;

#[derive(Debug, Serialize)]
pub struct ContainerInfo {
    pub session_id: String,
    pub container_name: Option<String>,
    pub created_by: String,
    pub is_active: bool,
}

pub async fn list(State(ctx): State<AppContext>, identity: UserIdentity) -> Json<Vec<ContainerInfo>> {
    let containers = ctx
        .sessions
        .get_all_sessions()
        .into_iter()
        .map(|s| s.summary())
        .filter(|s| s.isolation_mode == IsolationMode::Container)
        .filter(|s| s.created_by == identity.username || identity.has_permission("manage_all_sessions"))
        .map(|s| ContainerInfo {
            session_id: s.session_id,
            container_name: s.container_name,
            created_by: s.created_by,
            is_active: s.is_active,
        })
        .collect();
    Json(containers)
}

#[derive(Debug, Deserialize)]
pub struct SessionIdBody {
    pub session_id: String,
}

fn container_session(ctx: &AppContext, session_id: &str) -> AppResult<SessionSummary> {
    let session = ctx
        .sessions
        .get_session(session_id)
        .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
    let summary = session.summary();
    if summary.isolation_mode != IsolationMode::Container {
        return Err(AppError::Invalid("session is not container-isolated".into()));
    }
    Ok(summary)
}

/// Mints a session-scoped access token for the in-container shell, gated by
/// `sandbox_login` (spec §6). Minting, not actually opening, the shell: the
/// browser uses the returned token against the client WebSocket's normal
/// attach flow.
pub async fn attach(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Json(body): Json<SessionIdBody>,
) -> AppResult<Json<serde_json::Value>> {
    if !identity.has_permission("sandbox_login") {
        return Err(AppError::Forbidden);
    }
    let summary = container_session(&ctx, &body.session_id)?;
    if summary.created_by != identity.username && !identity.has_permission("manage_all_sessions") {
        return Err(AppError::Forbidden);
    }

    let payload = crate::auth::AccessTokenPayload {
        kind: crate::auth::token::AccessTokenKind::Session,
        session_id: summary.session_id.clone(),
        iat: crate::auth::token::now_secs(),
        exp: Some(crate::auth::token::now_secs() + 300),
    };
    let token = ctx.tokens.sign_access_token(&payload);
    Ok(Json(serde_json::json!({ "session_id": summary.session_id, "token": token })))
}

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub session_id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Spawns a child session sharing the parent's container, the nested-tab
/// shape spec §3 already names (`parent_session_id`, `child_tab_type`).
pub async fn exec(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Json(req): Json<ExecRequest>,
) -> AppResult<Json<SessionSummary>> {
    if !identity.has_permission("sandbox_login") {
        return Err(AppError::Forbidden);
    }
    let parent = container_session(&ctx, &req.session_id)?;
    if parent.created_by != identity.username && !identity.has_permission("manage_all_sessions") {
        return Err(AppError::Forbidden);
    }

    let options = CreateSessionOptions {
        command: req.command,
        args: req.args,
        cwd: PathBuf::from("."),
        env: HashMap::new(),
        created_by: identity.username.clone(),
        visibility: Visibility::Private,
        workspace: Some(parent.workspace.clone()),
        alias: None,
        title: None,
        template_id: None,
        template_parameters: HashMap::new(),
        isolation_mode: IsolationMode::Container,
        container_name: parent.container_name.clone(),
        interactive: true,
        parent_session_id: Some(parent.session_id.clone()),
        child_tab_type: Some("exec".to_string()),
        show_in_sidebar: true,
    };

    let session = ctx
        .sessions
        .create_session(options, ctx.termination_tx.clone())
        .map_err(AppError::Internal)?;
    Ok(Json(session.summary()))
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub session_id: String,
}

pub async fn lookup(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Query(query): Query<LookupQuery>,
) -> AppResult<Json<ContainerInfo>> {
    let summary = container_session(&ctx, &query.session_id)?;
    if summary.created_by != identity.username && !identity.has_permission("manage_all_sessions") {
        return Err(AppError::Forbidden);
    }
    Ok(Json(ContainerInfo {
        session_id: summary.session_id,
        container_name: summary.container_name,
        created_by: summary.created_by,
        is_active: summary.is_active,
    }))
}

pub async fn stop(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Json(body): Json<SessionIdBody>,
) -> AppResult<StatusCode> {
    if !identity.has_permission("terminate_containers") {
        return Err(AppError::Forbidden);
    }
    let summary = container_session(&ctx, &body.session_id)?;
    tracing::info!(session_id = %summary.session_id, container_name = ?summary.container_name, "stopping container (runtime adapter is external)");
    ctx.sessions.terminate_session(&summary.session_id)?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn terminate_all(State(ctx): State<AppContext>, identity: UserIdentity) -> AppResult<Json<serde_json::Value>> {
    if !identity.has_permission("terminate_containers") {
        return Err(AppError::Forbidden);
    }
    let mut terminated = Vec::new();
    for session in ctx.sessions.get_active_sessions() {
        let summary = session.summary();
        if summary.isolation_mode == IsolationMode::Container {
            tracing::info!(session_id = %summary.session_id, container_name = ?summary.container_name, "stopping container (runtime adapter is external)");
            if ctx.sessions.terminate_session(&summary.session_id).is_ok() {
                terminated.push(summary.session_id);
            }
        }
    }
    Ok(Json(serde_json::json!({ "terminated": terminated })))
}
