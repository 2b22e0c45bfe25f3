//! Interactive notification responses (spec §6): strict single-use on
//! `action_key`, 409 on an already-responded notification, 400 if it was
//! never interactive in the first place.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::connection::OutboundMessage;
use crate::error::{AppError, AppResult};
use crate::state::AppContext;
use crate::users::UserIdentity;

pub async fn list(State(ctx): State<AppContext>, identity: UserIdentity) -> impl IntoResponse {
    Json(ctx.notifications.list(&identity.username).await)
}

pub async fn get_one(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let record = ctx
        .notifications
        .get_by_id(&identity.username, &id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("notification {id}")))?;
    Ok(Json(record))
}

pub async fn mark_read(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    if !ctx.notifications.mark_read(&identity.username, &id).await {
        return Err(AppError::NotFound(format!("notification {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, serde::Serialize)]
pub struct MarkAllReadResponse {
    pub updated: usize,
}

pub async fn mark_all_read(State(ctx): State<AppContext>, identity: UserIdentity) -> impl IntoResponse {
    let updated = ctx.notifications.mark_all_read(&identity.username).await;
    Json(MarkAllReadResponse { updated })
}

pub async fn delete(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    if !ctx.notifications.delete(&identity.username, &id).await {
        return Err(AppError::NotFound(format!("notification {id}")));
    }
    ctx.connections.send_to_user(
        &identity.username,
        OutboundMessage::NotificationDeleted {
            user: identity.username.clone(),
            id,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_all(State(ctx): State<AppContext>, identity: UserIdentity) -> StatusCode {
    ctx.notifications.clear_all(&identity.username).await;
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct NotificationActionRequest {
    #[serde(default)]
    pub response: Value,
    #[serde(default)]
    pub masked_input_ids: Vec<String>,
}

pub async fn action(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Path(id): Path<String>,
    Json(req): Json<NotificationActionRequest>,
) -> AppResult<StatusCode> {
    let record = ctx
        .notifications
        .set_response(&identity.username, &id, req.response.clone(), req.masked_input_ids)
        .await?;

    ctx.connections.send_to_user(
        &identity.username,
        OutboundMessage::NotificationActionResult {
            user: identity.username.clone(),
            id: record.id.clone(),
            result: req.response,
        },
    );
    ctx.connections.send_to_user(
        &identity.username,
        OutboundMessage::NotificationUpdated {
            user: identity.username.clone(),
            notification: serde_json::to_value(&record).unwrap_or(Value::Null),
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn cancel(
    State(ctx): State<AppContext>,
    identity: UserIdentity,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let record = ctx
        .notifications
        .set_response(&identity.username, &id, serde_json::json!({ "cancelled": true }), Vec::new())
        .await?;

    ctx.connections.send_to_user(
        &identity.username,
        OutboundMessage::NotificationUpdated {
            user: identity.username.clone(),
            notification: serde_json::to_value(&record).unwrap_or(Value::Null),
        },
    );
    Ok(StatusCode::NO_CONTENT)
}
