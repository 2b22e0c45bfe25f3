//! Shutdown coordination (spec §5): a single idempotent drain triggered by
//! `SIGTERM`/`SIGINT`, grounded on this codebase's `watch`-channel pattern
//! for broadcasting a one-shot boolean to every long-running task.
//!
//! A second signal arriving mid-drain is a no-op: the `watch::Sender` is
//! only ever set once, guarded by an `AtomicBool` so a racing second
//! caller observes the first call already in flight and returns immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::watch;

use crate::error::AppError;
use crate::state::AppContext;

#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    /// Marks shutdown in progress. Returns `true` the first time it is
    /// called; a racing second call returns `false` and does nothing,
    /// matching spec §5's "re-entrant shutdown signals are coalesced".
    pub fn trigger(&self) -> bool {
        if self.triggered.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.tx.send(true);
        true
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once `SIGINT` (`Ctrl+C`) or, on unix, `SIGTERM` is received.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Rejects new REST work with 503 once the drain has begun (spec §5, §8:
/// "service proxy called while `isShuttingDown`: 503"). Mounted outermost
/// so it short-circuits before auth resolution runs.
pub async fn shutdown_guard(State(ctx): State<AppContext>, req: Request<Body>, next: Next) -> Response {
    if ctx.shutdown.is_shutting_down() {
        return AppError::ServiceUnavailable("server is shutting down".into()).into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_trigger_is_a_no_op() {
        let handle = ShutdownHandle::new();
        assert!(handle.trigger());
        assert!(!handle.trigger());
        assert!(handle.is_shutting_down());
    }
}
