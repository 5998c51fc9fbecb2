use tracing::debug;

use crate::websocket::ConnectionId;

/// Receiver for the payloads of inbound `/audio-stream` messages.
///
/// Implementations are shared by every connection and called from the socket
/// actors, so they must not block. A sink that talks to a remote service
/// should queue the payload and return.
pub trait AudioSink: Send + Sync + 'static {
    /// Called once per complete inbound message, after it was acknowledged.
    fn accept(&self, connection: ConnectionId, payload: &[u8]);

    /// Called by `POST /api/coaching/clear-buffer`. Sinks that keep
    /// server-side audio state drop it here.
    fn reset(&self) {}
}

/// Sink used when no transcription backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl AudioSink for DiscardSink {
    fn accept(&self, connection: ConnectionId, payload: &[u8]) {
        debug!(connection = %connection, bytes = payload.len(), "Discarding audio payload");
    }

    fn reset(&self) {
        debug!("Clear-buffer requested; no audio state is kept");
    }
}
