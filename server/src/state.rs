//! The explicit application context threaded through every handler and
//! background task, replacing the global singletons (`global.sessionManager`,
//! `global.connectionManager`, ...) named in spec §9's Design Notes.
//!
//! `AppContext` is cheap to `Clone` (every field is an `Arc`), the same
//! shape as the teacher's `AppState`, generalized to the full set of
//! registries this server owns.

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::auth::TokenService;
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::notifications::NotificationStore;
use crate::proxy::ProxyRateLimiter;
use crate::session::{SessionStore, TerminationEvent};
use crate::shutdown::ShutdownHandle;
use crate::tunnel::TunnelManager;
use crate::users::UserStore;
use crate::workspace::TemplateResolver;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub tokens: Arc<TokenService>,
    pub users: Arc<RwLock<UserStore>>,
    pub sessions: Arc<SessionStore>,
    pub connections: Arc<ConnectionManager>,
    pub tunnels: Arc<TunnelManager>,
    pub notifications: Arc<NotificationStore>,
    pub templates: Arc<dyn TemplateResolver>,
    pub proxy_rate_limiter: Arc<ProxyRateLimiter>,
    pub shutdown: ShutdownHandle,
    /// Cloned into every `create_session` call; the termination dispatcher
    /// (spawned once in `main`) is the sole reader.
    pub termination_tx: mpsc::UnboundedSender<TerminationEvent>,
}
