//! # `/audio-stream` WebSocket Endpoint
//!
//! Clients stream audio as binary (or text) messages; every message is
//! answered with an acknowledgment carrying its byte length.
//!
//! ## Protocol:
//! - **Client → Server**: arbitrary text or binary messages
//! - **Server → Client**: `{"type":"ack","bytes":N}` per inbound message
//! - **Heartbeat**: the server pings every heartbeat interval and terminates
//!   peers that did not answer the previous ping
//!
//! Path and origin checks happen before the handshake, in
//! [`crate::middleware::UpgradeGate`].

pub mod origin;
pub mod registry;
pub mod socket;

use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub use origin::{AllowAnyOrigin, OriginAllowList, OriginPolicy};
pub use registry::{ConnectionCommand, ConnectionRegistry, Liveness};
pub use socket::AudioStreamSocket;

/// Transport-level identity of one WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Messages the server sends on `/audio-stream`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Sent once per inbound message.
    Ack { bytes: usize },
}

/// WebSocket endpoint handler.
///
/// Performs the handshake and hands the connection to an
/// [`AudioStreamSocket`] actor. Requests that are not valid WebSocket
/// upgrades get a 400.
pub async fn audio_stream(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    // Proxies put the client address in Forwarded / X-Forwarded-For.
    let remote_addr = req
        .connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string();

    debug!(remote_addr = %remote_addr, uri = %req.uri(), "WebSocket upgrade requested");

    let max_message_bytes = state.config().websocket.max_message_bytes;
    let socket = AudioStreamSocket::new(state.get_ref().clone(), remote_addr.clone());

    ws::WsResponseBuilder::new(socket, &req, stream)
        .frame_size(max_message_bytes)
        .start()
        .map_err(|err| {
            warn!(remote_addr = %remote_addr, error = %err, "WebSocket handshake failed");
            AppError::Handshake(err.to_string())
        })
}
