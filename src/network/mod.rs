//! Network Layer
//!
//! WebSocket host for the authoritative session.
//! This layer is **non-deterministic** - all coordination runs through `session/`.

pub mod protocol;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, ServerError, ErrorCode, ProtocolError, WelcomeInfo};
pub use server::{GameServer, ServerConfig, GameServerError, route_intent};
