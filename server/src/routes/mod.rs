//! HTTP/WebSocket route handlers (spec §6), assembled into one `Router` by
//! [`crate::router::build_router`].

pub mod containers;
pub mod notifications;
pub mod sessions;
pub mod user;
pub mod ws_client;
pub mod ws_tunnel;
