use serde::{Deserialize, Serialize};

/// Text-frame control messages carried on the carrier WebSocket alongside
/// binary stream frames.
///
/// `#[serde(tag = "type", rename_all = "snake_case")]` matches the
/// internally-tagged JSON shape used throughout this protocol family (see
/// the server's client-facing WebSocket messages).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Outbound: ask the in-session helper to connect to a loopback port.
    Open { id: u32, host: String, port: u16 },
    /// Inbound: abort a specific stream.
    Err { id: u32, message: String },
    /// Forward-compatible catch-all (e.g. "hello"); tolerated and ignored.
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_serializes_with_tag() {
        let msg = ControlMessage::Open {
            id: 1,
            host: "127.0.0.1".into(),
            port: 8080,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "open");
        assert_eq!(json["port"], 8080);
    }

    #[test]
    fn unknown_types_are_tolerated() {
        let msg: ControlMessage = serde_json::from_str(r#"{"type":"hello"}"#).unwrap();
        assert!(matches!(msg, ControlMessage::Other));
    }

    #[test]
    fn err_round_trips() {
        let msg = ControlMessage::Err {
            id: 3,
            message: "boom".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ControlMessage = serde_json::from_str(&json).unwrap();
        match back {
            ControlMessage::Err { id, message } => {
                assert_eq!(id, 3);
                assert_eq!(message, "boom");
            }
            _ => panic!("wrong variant"),
        }
    }
}
