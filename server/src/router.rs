//! Concrete axum route table (spec §4.12/§6), assembled the way the
//! teacher composes its router: `Router::new().route(...).layer(...).with_state(...)`.

use axum::middleware;
use axum::routing::{any, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::auth::auth_middleware;
use crate::proxy;
use crate::routes::{containers, notifications, sessions, user, ws_client, ws_tunnel};
use crate::shutdown::shutdown_guard;
use crate::state::AppContext;

pub fn build_router(ctx: AppContext) -> Router {
    let api = Router::new()
        .route("/api/sessions", get(sessions::list).post(sessions::create))
        .route(
            "/api/sessions/reorder",
            post(sessions::reorder_workspace),
        )
        .route("/api/sessions/:sid", get(sessions::get_one))
        .route("/api/sessions/:sid/terminate", post(sessions::terminate))
        .route("/api/sessions/:sid/history/raw", get(sessions::history_raw))
        .route("/api/sessions/:sid/alias", post(sessions::rename_alias))
        .route("/api/sessions/:sid/visibility", post(sessions::update_visibility))
        .route("/api/sessions/:sid/title", post(sessions::update_title))
        .route("/api/containers", get(containers::list))
        .route("/api/containers/attach", post(containers::attach))
        .route("/api/containers/exec", post(containers::exec))
        .route("/api/containers/lookup", get(containers::lookup))
        .route("/api/containers/stop", post(containers::stop))
        .route("/api/containers/terminate-all", post(containers::terminate_all))
        .route(
            "/api/notifications",
            get(notifications::list).delete(notifications::clear_all),
        )
        .route("/api/notifications/read-all", post(notifications::mark_all_read))
        .route(
            "/api/notifications/:id",
            get(notifications::get_one).delete(notifications::delete),
        )
        .route("/api/notifications/:id/read", post(notifications::mark_read))
        .route("/api/notifications/:id/action", post(notifications::action))
        .route("/api/notifications/:id/cancel", post(notifications::cancel))
        .route("/api/user/reset-password", post(user::reset_password))
        .route("/api/sessions/:sid/tunnel", get(ws_tunnel::handle))
        .route("/api/sessions/:sid/service/:port/*suffix", any(proxy::dispatch))
        .route("/api/sessions/:sid/service/:port", any(proxy::dispatch));

    api.route("/:client_id", get(ws_client::handle))
        .layer(middleware::from_fn_with_state(ctx.clone(), auth_middleware))
        .layer(middleware::from_fn_with_state(ctx.clone(), shutdown_guard))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
