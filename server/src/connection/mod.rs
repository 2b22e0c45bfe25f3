//! Connection Manager (spec §4.3): the registry of connected WebSocket
//! clients and the broadcast fan-out over it.
//!
//! Generalizes the connection/agent registries of the relay hub this server
//! grew from: a `DashMap<ClientId, ClientTx>` keyed lookup, now carrying a
//! per-client [`OutboundMessage`] envelope instead of a single wire-message
//! type, and a visibility-aware broadcast instead of a flat fan-out.

pub mod messages;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

pub use messages::{InboundMessage, OutboundMessage, SessionUpdateType};

pub type ClientId = String;
pub type ClientTx = mpsc::UnboundedSender<OutboundMessage>;

struct ClientEntry {
    tx: ClientTx,
    username: String,
    connected_at: u64,
}

/// Registry of connected clients and the broadcast/unicast primitives built
/// on top of it. Eviction is send-failure-driven: a client whose channel is
/// closed is dropped from the registry the next time a send to it fails.
pub struct ConnectionManager {
    clients: DashMap<ClientId, ClientEntry>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    pub fn register(&self, client_id: ClientId, username: String) -> (ClientTx, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.insert(
            client_id,
            ClientEntry {
                tx: tx.clone(),
                username,
                connected_at: crate::auth::token::now_secs(),
            },
        );
        (tx, rx)
    }

    pub fn unregister(&self, client_id: &str) {
        self.clients.remove(client_id);
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    pub fn username_of(&self, client_id: &str) -> Option<String> {
        self.clients.get(client_id).map(|e| e.username.clone())
    }

    pub fn connected_at(&self, client_id: &str) -> Option<u64> {
        self.clients.get(client_id).map(|e| e.connected_at)
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.iter().map(|e| e.key().clone()).collect()
    }

    /// Sends to one client, evicting it from the registry if the channel is
    /// closed (the client's WebSocket task has already exited).
    pub fn send_to_client(&self, client_id: &str, message: OutboundMessage) -> bool {
        let closed = match self.clients.get(client_id) {
            Some(entry) => entry.tx.send(message).is_err(),
            None => return false,
        };
        if closed {
            self.clients.remove(client_id);
        }
        !closed
    }

    /// Sends to every client for which `filter` returns true, evicting any
    /// whose channel has closed. `filter` typically checks session
    /// visibility/attachment before delivering.
    pub fn broadcast(&self, message: OutboundMessage, filter: impl Fn(&str) -> bool) {
        let mut dead = Vec::new();
        for entry in self.clients.iter() {
            let client_id = entry.key();
            if !filter(client_id) {
                continue;
            }
            if entry.value().tx.send(message.clone()).is_err() {
                dead.push(client_id.clone());
            }
        }
        for client_id in dead {
            self.clients.remove(&client_id);
        }
    }

    pub fn broadcast_all(&self, message: OutboundMessage) {
        self.broadcast(message, |_| true);
    }

    /// Sends to every connection belonging to `username`, a convenience
    /// wrapper for per-user messages that don't need the full
    /// `session_updated` visibility logic below.
    pub fn send_to_user(&self, username: &str, message: OutboundMessage) {
        self.broadcast(message, |client_id| self.username_of(client_id).as_deref() == Some(username));
    }

    /// Applies the visibility rules of spec §4.3: a message carrying a
    /// `user` field goes only to that user's connections; a `session_updated`
    /// for a private session goes only to its owner and to clients whose
    /// resolved permissions include `manage_all_sessions`; everything else
    /// goes to everyone.
    pub fn broadcast_with_visibility(&self, message: OutboundMessage, users: &crate::users::UserStore) {
        if let Some(target_user) = message.targeted_user() {
            let target_user = target_user.to_string();
            self.broadcast(message, |client_id| {
                self.username_of(client_id).as_deref() == Some(target_user.as_str())
            });
            return;
        }

        if let Some(session) = message.session_update() {
            if session.visibility == crate::session::Visibility::Private {
                let owner = session.created_by.clone();
                self.broadcast(message, |client_id| {
                    let Some(username) = self.username_of(client_id) else {
                        return false;
                    };
                    username == owner || users.resolve_identity(&username).has_permission("manage_all_sessions")
                });
                return;
            }
        }

        self.broadcast_all(message);
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedConnectionManager = Arc<ConnectionManager>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_to_unknown_client_returns_false() {
        let manager = ConnectionManager::new();
        assert!(!manager.send_to_client("ghost", OutboundMessage::Pong));
    }

    #[test]
    fn send_failure_evicts_client() {
        let manager = ConnectionManager::new();
        let (tx, rx) = manager.register("c1".into(), "alice".into());
        drop(rx);
        drop(tx);
        assert!(!manager.send_to_client("c1", OutboundMessage::Pong));
        assert!(!manager.is_connected("c1"));
    }

    #[test]
    fn broadcast_respects_filter() {
        let manager = ConnectionManager::new();
        let (_tx_a, mut rx_a) = manager.register("a".into(), "alice".into());
        let (_tx_b, mut rx_b) = manager.register("b".into(), "bob".into());
        manager.broadcast(OutboundMessage::Pong, |id| id == "a");
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }
}
