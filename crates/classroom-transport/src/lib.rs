//! Transport layer for classroom sessions.
//!
//! Provides:
//! - Wire protocol (JSON, `type`-tagged)
//! - Message router dispatching client envelopes to the session hub
//! - WebSocket endpoints (feature: websocket)
//! - Reconnecting client (feature: client)

pub mod protocol;
pub mod reconnect;
pub mod router;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "client")]
pub mod client;

pub use protocol::{ClientMessage, ServerMessage};
pub use reconnect::{ClientError, ClientEvent, Connector, LinkState, ReconnectManager, Transport};
pub use router::MessageRouter;
