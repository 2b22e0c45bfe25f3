//! Wire types for the per-session reverse-tunnel carrier.
//!
//! A carrier is one WebSocket per session multiplexing many logical
//! [`StreamId`]s. It speaks two framings on the same connection: JSON text
//! frames carry [`ControlMessage`]s, binary frames carry [`Frame`]s.

mod control;
mod frame;
mod stream_id;

pub use control::ControlMessage;
pub use frame::{Frame, FrameType, ProtocolError};
pub use stream_id::{StreamId, StreamIdAllocator};
