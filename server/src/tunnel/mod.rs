//! Tunnel Manager (spec §4.7): one carrier WebSocket per session,
//! multiplexing many logical streams over binary frames defined in
//! `tunnel-protocol`.

pub mod carrier;
pub mod stream;

use std::sync::Arc;

use dashmap::DashMap;

pub use carrier::Carrier;
pub use stream::TunnelStream;

/// Registry of per-session carriers. Re-registering a session closes the
/// previous carrier with close code 1012 ("replaced").
pub struct TunnelManager {
    carriers: DashMap<String, Arc<Carrier>>,
}

impl TunnelManager {
    pub fn new() -> Self {
        Self {
            carriers: DashMap::new(),
        }
    }

    pub fn register(&self, session_id: &str, outbound: carrier::OutboundTx) -> Arc<Carrier> {
        let carrier = Arc::new(Carrier::new(session_id.to_string(), outbound));
        if let Some((_, old)) = self.carriers.remove(session_id) {
            old.close_with_code(1012, "replaced");
        }
        self.carriers.insert(session_id.to_string(), Arc::clone(&carrier));
        carrier
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Carrier>> {
        self.carriers.get(session_id).map(|e| Arc::clone(e.value()))
    }

    pub fn has_carrier(&self, session_id: &str) -> bool {
        self.carriers.contains_key(session_id)
    }

    /// Removes `session_id`'s carrier entry, but only if it is still
    /// pointing at `carrier` — avoids a stale websocket task evicting a
    /// carrier that has since been legitimately replaced.
    pub fn unregister_if_current(&self, session_id: &str, carrier: &Arc<Carrier>) {
        if let Some(entry) = self.carriers.get(session_id) {
            if Arc::ptr_eq(entry.value(), carrier) {
                drop(entry);
                self.carriers.remove(session_id);
            }
        }
    }
}

impl Default for TunnelManager {
    fn default() -> Self {
        Self::new()
    }
}
