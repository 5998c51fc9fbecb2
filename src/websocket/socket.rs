//! Per-connection actor for `/audio-stream`.
//!
//! ## Lifecycle:
//! 1. **started**: registers with the [`ConnectionRegistry`], liveness = true
//! 2. **messages**: every complete text/binary message is acknowledged and
//!    passed to the audio sink; pongs mark the connection alive
//! 3. **stopped**: unregisters; happens on client close, protocol error,
//!    missed heartbeat or server shutdown

use actix::prelude::*;
use actix_http::ws::Item;
use actix_web::web::{Bytes, BytesMut};
use actix_web_actors::ws;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::registry::{ConnectionCommand, ConnectionRegistry, Liveness, Register, Unregister};
use super::{ConnectionId, OutboundMessage};
use crate::audio::AudioSink;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageKind {
    Text,
    Binary,
}

/// A fragmented message being reassembled from continuation frames.
struct PartialMessage {
    kind: MessageKind,
    data: BytesMut,
}

pub struct AudioStreamSocket {
    id: ConnectionId,
    remote_addr: String,
    liveness: Liveness,
    registry: Addr<ConnectionRegistry>,
    sink: Arc<dyn AudioSink>,
    state: AppState,
    max_message_bytes: usize,
    partial: Option<PartialMessage>,
}

impl AudioStreamSocket {
    pub fn new(state: AppState, remote_addr: String) -> Self {
        Self {
            id: ConnectionId::new(),
            remote_addr,
            liveness: Liveness::new(),
            registry: state.registry.clone(),
            sink: state.audio_sink(),
            max_message_bytes: state.config().websocket.max_message_bytes,
            state,
            partial: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Reply with the byte count, then hand the payload on.
    fn acknowledge(&self, payload: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        let ack = OutboundMessage::Ack { bytes: payload.len() };

        match serde_json::to_string(&ack) {
            Ok(json) => ctx.text(json),
            Err(err) => {
                error!(connection = %self.id, error = %err, "Failed to encode acknowledgment");
                return;
            }
        }

        self.state.record_acknowledgment(payload.len());
        self.sink.accept(self.id, payload);
    }

    fn close_with(
        &mut self,
        ctx: &mut ws::WebsocketContext<Self>,
        code: ws::CloseCode,
        description: &str,
    ) {
        warn!(
            connection = %self.id,
            remote_addr = %self.remote_addr,
            code = ?code,
            "Closing connection: {}",
            description
        );
        self.partial = None;
        ctx.close(Some(ws::CloseReason {
            code,
            description: Some(description.to_string()),
        }));
        ctx.stop();
    }

    /// Frame ordering is enforced by the codec: a start frame never arrives
    /// while a message is in progress and a continuation never arrives
    /// without one.
    fn start_fragment(
        &mut self,
        kind: MessageKind,
        data: Bytes,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let mut buffer = BytesMut::with_capacity(data.len());
        buffer.extend_from_slice(&data);
        self.partial = Some(PartialMessage { kind, data: buffer });
        self.enforce_size_limit(ctx);
    }

    /// Appends a continuation frame. Returns false when the connection was
    /// closed because of it.
    fn extend_fragment(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) -> bool {
        if let Some(partial) = self.partial.as_mut() {
            partial.data.extend_from_slice(data);
        }

        self.enforce_size_limit(ctx)
    }

    fn enforce_size_limit(&mut self, ctx: &mut ws::WebsocketContext<Self>) -> bool {
        let too_big = self
            .partial
            .as_ref()
            .is_some_and(|partial| partial.data.len() > self.max_message_bytes);

        if too_big {
            self.close_with(ctx, ws::CloseCode::Size, "message too big");
            return false;
        }
        true
    }

    fn finish_fragment(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(partial) = self.partial.take() else {
            return;
        };

        if partial.kind == MessageKind::Text && std::str::from_utf8(&partial.data).is_err() {
            self.close_with(ctx, ws::CloseCode::Invalid, "text message is not valid UTF-8");
            return;
        }

        self.acknowledge(&partial.data, ctx);
    }

    fn handle_continuation(&mut self, item: Item, ctx: &mut ws::WebsocketContext<Self>) {
        match item {
            Item::FirstText(data) => self.start_fragment(MessageKind::Text, data, ctx),
            Item::FirstBinary(data) => self.start_fragment(MessageKind::Binary, data, ctx),
            Item::Continue(data) => {
                self.extend_fragment(&data, ctx);
            }
            Item::Last(data) => {
                if self.extend_fragment(&data, ctx) {
                    self.finish_fragment(ctx);
                }
            }
        }
    }
}

impl Actor for AudioStreamSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection = %self.id, remote_addr = %self.remote_addr, "WebSocket connected");

        self.state.connection_opened();
        self.registry.do_send(Register {
            id: self.id,
            remote_addr: self.remote_addr.clone(),
            liveness: self.liveness.clone(),
            recipient: ctx.address().recipient(),
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.registry.do_send(Unregister { id: self.id });
        self.state.connection_closed();

        info!(connection = %self.id, remote_addr = %self.remote_addr, "WebSocket closed");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AudioStreamSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.acknowledge(text.as_bytes(), ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.acknowledge(&data, ctx);
            }
            Ok(ws::Message::Continuation(item)) => {
                self.handle_continuation(item, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.liveness.mark_alive();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(connection = %self.id, reason = ?reason, "Client closed connection");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Nop) => {}
            Err(ws::ProtocolError::Overflow) => {
                self.close_with(ctx, ws::CloseCode::Size, "message too big");
            }
            Err(ws::ProtocolError::ContinuationNotStarted) => {
                self.close_with(ctx, ws::CloseCode::Protocol, "continuation frame without a starting frame");
            }
            Err(ws::ProtocolError::ContinuationStarted) => {
                self.close_with(ctx, ws::CloseCode::Protocol, "new message started before the previous one finished");
            }
            Err(err @ ws::ProtocolError::Io(_)) => {
                error!(
                    connection = %self.id,
                    remote_addr = %self.remote_addr,
                    error = %err,
                    "WebSocket transport error"
                );
                ctx.stop();
            }
            Err(err) => {
                let description = err.to_string();
                self.close_with(ctx, ws::CloseCode::Protocol, &description);
            }
        }
    }
}

impl Handler<ConnectionCommand> for AudioStreamSocket {
    type Result = ();

    fn handle(&mut self, command: ConnectionCommand, ctx: &mut Self::Context) {
        match command {
            ConnectionCommand::Ping => {
                ctx.ping(b"");
            }
            ConnectionCommand::Terminate => {
                warn!(
                    connection = %self.id,
                    remote_addr = %self.remote_addr,
                    "Heartbeat missed, terminating connection"
                );
                self.state.record_heartbeat_termination();
                // No close frame: the peer is presumed gone.
                ctx.stop();
            }
            ConnectionCommand::Close => {
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Away,
                    description: Some("server shutting down".to_string()),
                }));
                ctx.stop();
            }
        }
    }
}
