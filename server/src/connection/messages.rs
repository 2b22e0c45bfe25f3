//! Wire shapes for the client WebSocket (spec §6): the inbound message
//! types a connected browser sends, and the outbound types the server
//! broadcasts or unicasts back.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::SessionSummary;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Auth {
        token: Option<String>,
    },
    Stdin {
        session_id: String,
        data: String,
    },
    Resize {
        session_id: String,
        cols: u16,
        rows: u16,
    },
    Attach {
        session_id: String,
        #[serde(default)]
        since_offset: Option<u64>,
    },
    Detach {
        session_id: String,
    },
    TitleSet {
        session_id: String,
        title: String,
    },
    Ping,
    /// Forward-compatible catch-all; unrecognized inbound types are ignored
    /// rather than closing the connection (spec §4.7's "tolerated" policy
    /// applies symmetrically to the client socket).
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionUpdateType {
    Created,
    Updated,
    Terminated,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    AuthSuccess {
        username: String,
    },
    SessionUpdated {
        update_type: SessionUpdateType,
        session: SessionSummary,
    },
    Output {
        session_id: String,
        data: String,
        offset: u64,
    },
    /// Replays the last-known PTY size to a client attaching to a session
    /// already in progress, so its rendering starts consistent (spec
    /// §4.5: "remembered and re-applied to late-joining clients").
    Resize {
        session_id: String,
        cols: u16,
        rows: u16,
    },
    Notification {
        user: String,
        notification: Value,
    },
    NotificationActionResult {
        user: String,
        id: String,
        result: Value,
    },
    NotificationUpdated {
        user: String,
        notification: Value,
    },
    NotificationDeleted {
        user: String,
        id: String,
    },
    WorkspacesUpdated {
        user: String,
        workspaces: Value,
    },
    SessionsReordered {
        user: String,
        workspace: String,
        order: Vec<String>,
    },
    Shutdown {
        reason: String,
    },
    Error {
        message: String,
    },
    Pong,
}

impl OutboundMessage {
    pub fn output(session_id: impl Into<String>, bytes: &[u8], offset: u64) -> Self {
        OutboundMessage::Output {
            session_id: session_id.into(),
            data: B64.encode(bytes),
            offset,
        }
    }

    pub fn session_updated(update_type: SessionUpdateType, session: SessionSummary) -> Self {
        OutboundMessage::SessionUpdated { update_type, session }
    }

    /// The user this message is targeted at, if any. Messages carrying a
    /// user field are delivered only to that user's connections; everything
    /// else falls through to broadcast-with-visibility (spec §4.3).
    pub fn targeted_user(&self) -> Option<&str> {
        match self {
            OutboundMessage::Notification { user, .. }
            | OutboundMessage::NotificationActionResult { user, .. }
            | OutboundMessage::NotificationUpdated { user, .. }
            | OutboundMessage::NotificationDeleted { user, .. }
            | OutboundMessage::WorkspacesUpdated { user, .. }
            | OutboundMessage::SessionsReordered { user, .. } => Some(user),
            _ => None,
        }
    }

    /// The session this message concerns, for `session_updated` visibility
    /// filtering.
    pub fn session_update(&self) -> Option<&SessionSummary> {
        match self {
            OutboundMessage::SessionUpdated { session, .. } => Some(session),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_stdin_parses() {
        let json = r#"{"type":"stdin","session_id":"s1","data":"aGk="}"#;
        let msg: InboundMessage = serde_json::from_str(json).unwrap();
        matches!(msg, InboundMessage::Stdin { .. });
    }

    #[test]
    fn unknown_inbound_type_is_tolerated() {
        let json = r#"{"type":"future_feature","foo":"bar"}"#;
        let msg: InboundMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, InboundMessage::Other));
    }

    #[test]
    fn output_message_base64_encodes_bytes() {
        let msg = OutboundMessage::output("s1", b"hi", 0);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["data"], "aGk=");
    }
}
