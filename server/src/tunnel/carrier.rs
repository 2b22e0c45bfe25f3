//! A single session's carrier connection: demultiplexes incoming binary
//! frames to the right [`TunnelStream`], and serializes outbound control
//! and data frames onto one `mpsc` channel the websocket route drains into
//! the real socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tunnel_protocol::{ControlMessage, Frame, StreamIdAllocator};

use super::stream::TunnelStream;
use crate::error::{AppError, AppResult};

pub type OutboundTx = mpsc::UnboundedSender<Message>;

pub struct Carrier {
    session_id: String,
    outbound: OutboundTx,
    streams: DashMap<u32, mpsc::UnboundedSender<Bytes>>,
    allocator: StreamIdAllocator,
    closed: AtomicBool,
}

impl Carrier {
    pub fn new(session_id: String, outbound: OutboundTx) -> Self {
        Self {
            session_id,
            outbound,
            streams: DashMap::new(),
            allocator: StreamIdAllocator::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Allocates a stream id, sends the `open` control message, and returns
    /// a handle the proxy can read/write through. Validates the loopback
    /// and port-range invariants locally so a malformed request never
    /// reaches the in-session helper (spec §4.7).
    pub fn open_stream(self: &Arc<Self>, port: u16) -> AppResult<TunnelStream> {
        if port == 0 {
            return Err(AppError::Invalid("port must be between 1 and 65535".into()));
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::ServiceUnavailable("tunnel closed".into()));
        }

        let id = self.allocator.allocate().get();
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.insert(id, tx);

        let open = ControlMessage::Open {
            id,
            host: "127.0.0.1".to_string(),
            port,
        };
        let text = serde_json::to_string(&open).expect("control message always serializes");
        if self.outbound.send(Message::Text(text.into())).is_err() {
            self.streams.remove(&id);
            return Err(AppError::ServiceUnavailable("tunnel closed".into()));
        }

        Ok(TunnelStream::new(id, Arc::clone(self), rx))
    }

    pub fn send_data(&self, stream_id: u32, payload: Bytes) -> AppResult<()> {
        let frame = Frame::data(stream_id, payload);
        self.outbound
            .send(Message::Binary(frame.encode()))
            .map_err(|_| AppError::ServiceUnavailable("tunnel closed".into()))
    }

    pub fn send_end(&self, stream_id: u32) {
        let frame = Frame::end(stream_id);
        let _ = self.outbound.send(Message::Binary(frame.encode()));
        self.streams.remove(&stream_id);
    }

    pub fn deregister_stream(&self, stream_id: u32) {
        self.streams.remove(&stream_id);
    }

    /// Handles a binary frame read off the carrier websocket. Frames shorter
    /// than the 5-byte header are silently dropped (spec §4.7); end-frames
    /// for unknown ids are no-ops.
    pub fn dispatch_incoming_binary(&self, data: Bytes) {
        let frame = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(_) => return,
        };
        match frame.frame_type {
            tunnel_protocol::FrameType::Data => {
                if let Some(entry) = self.streams.get(&frame.stream_id) {
                    let _ = entry.value().send(frame.payload);
                }
            }
            tunnel_protocol::FrameType::End => {
                self.streams.remove(&frame.stream_id);
            }
        }
    }

    /// Handles a text (control) frame. Unknown control types are tolerated.
    pub fn dispatch_incoming_text(&self, text: &str) {
        let Ok(msg) = serde_json::from_str::<ControlMessage>(text) else {
            return;
        };
        if let ControlMessage::Err { id, message } = msg {
            tracing::debug!(session_id = %self.session_id, stream_id = id, %message, "tunnel stream aborted by carrier");
            self.streams.remove(&id);
        }
    }

    /// Closes this carrier with a specific WebSocket close code, tearing
    /// down every open stream so waiting readers observe EOF.
    pub fn close_with_code(&self, code: u16, reason: &str) {
        self.closed.store(true, Ordering::Release);
        let _ = self.outbound.send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })));
        self.teardown();
    }

    /// Tears down every open stream without closing the socket (used when
    /// the carrier's own read loop observes the connection ending).
    pub fn teardown(&self) {
        self.closed.store(true, Ordering::Release);
        self.streams.clear();
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}
