//! Entry point: loads configuration, brings up every registry, assembles
//! the router, and drives the graceful-shutdown sequence (spec §5).

mod access;
mod auth;
mod config;
mod connection;
mod error;
mod notifications;
mod proxy;
mod router;
mod routes;
mod session;
mod shutdown;
mod state;
mod tunnel;
mod users;
mod util;
mod workspace;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::connection::{ConnectionManager, OutboundMessage, SessionUpdateType};
use crate::notifications::NotificationStore;
use crate::proxy::ProxyRateLimiter;
use crate::session::pty::LocalPtySpawner;
use crate::session::{SessionStore, TerminationEvent};
use crate::shutdown::ShutdownHandle;
use crate::state::AppContext;
use crate::tunnel::TunnelManager;
use crate::users::UserStore;
use crate::workspace::FileTemplateStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    std::fs::create_dir_all(&config.data_dir)?;
    std::fs::create_dir_all(config.transcripts_dir())?;

    let tokens = auth::TokenService::load_or_create(&config.secret_path())?;
    let users = match UserStore::load(&config.users_path(), &config.groups_path()) {
        Ok(store) => store,
        Err(err) => {
            tracing::warn!(%err, "failed to load users/groups, starting with an empty user store");
            UserStore::empty()
        }
    };
    let templates = FileTemplateStore::load(&config.templates_path())?;
    let notifications = NotificationStore::load(
        config.notifications_path(),
        config.notification_retention_days,
        config.notification_retention_count,
        Duration::from_millis(config.notification_debounce_ms),
    )?;

    let sessions = Arc::new(SessionStore::new(
        Arc::new(LocalPtySpawner),
        config.transcripts_dir(),
        config.history_ring_bytes,
    ));
    let connections = Arc::new(ConnectionManager::new());
    let tunnels = Arc::new(TunnelManager::new());
    let proxy_rate_limiter = Arc::new(ProxyRateLimiter::new(config.proxy_rate_limit_per_minute));
    let shutdown = ShutdownHandle::new();

    let (termination_tx, termination_rx) = mpsc::unbounded_channel::<TerminationEvent>();

    let ctx = AppContext {
        config: Arc::new(config.clone()),
        tokens: Arc::new(tokens),
        users: Arc::new(RwLock::new(users)),
        sessions,
        connections,
        tunnels,
        notifications,
        templates: Arc::new(templates),
        proxy_rate_limiter,
        shutdown: shutdown.clone(),
        termination_tx,
    };

    spawn_termination_dispatcher(ctx.clone(), termination_rx);

    let app = router::build_router(ctx.clone());

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let shutdown_ctx = ctx.clone();
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown::wait_for_signal().await;
        tracing::info!("shutdown signal received, draining");
        run_shutdown_sequence(shutdown_ctx).await;
    });

    serve.await?;
    tracing::info!("listener closed, exiting");
    Ok(())
}

/// Drains [`TerminationEvent`]s for the lifetime of the process: marks the
/// session terminated in the store, broadcasts the update, enqueues a
/// per-user notification, and persists terminal metadata (spec §4.5(c)).
fn spawn_termination_dispatcher(ctx: AppContext, mut rx: mpsc::UnboundedReceiver<TerminationEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            ctx.sessions.mark_terminated(&event.session_id);

            if let Some(session) = ctx.sessions.get_session_including_terminated(&event.session_id) {
                let users = ctx.users.read().await;
                ctx.connections.broadcast_with_visibility(
                    OutboundMessage::session_updated(SessionUpdateType::Terminated, session.summary()),
                    &users,
                );
                drop(users);
                if let Err(err) = ctx.sessions.save_terminated_metadata(&session, &ctx.config.data_dir) {
                    tracing::warn!(session_id = %event.session_id, %err, "failed to persist terminated session metadata");
                }
            }

            ctx.notifications
                .add(
                    &event.created_by,
                    "Session ended".to_string(),
                    format!("Session {} exited with code {}", event.session_id, event.exit_code),
                    false,
                    None,
                )
                .await;

            if let Some(container_name) = &event.container_name {
                tracing::info!(session_id = %event.session_id, %container_name, "stopping container (runtime adapter is external)");
            }
        }
    });
}

/// Spec §5's shutdown drain: mark shutting-down, notify connected clients,
/// terminate every active session (bounded by a short grace period rather
/// than waiting indefinitely on slow children), and flush notifications
/// before the listener stops accepting new graceful-shutdown work.
async fn run_shutdown_sequence(ctx: AppContext) {
    if !ctx.shutdown.trigger() {
        // A shutdown is already in flight; the first caller owns the drain.
        return;
    }

    ctx.connections.broadcast_all(OutboundMessage::Shutdown {
        reason: "server is shutting down".to_string(),
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let active = ctx.sessions.get_active_sessions();
    for session in &active {
        let _ = ctx.sessions.terminate_session(&session.id);
    }
    tokio::time::sleep(Duration::from_millis(ctx.config.drain_timeout_ms)).await;

    if let Err(err) = ctx.notifications.flush().await {
        tracing::warn!(%err, "failed to flush notifications during shutdown");
    }

    tracing::info!(terminated = active.len(), "shutdown drain complete");
}
