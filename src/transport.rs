//! Transport abstraction for a room member's connection.
//!
//! A small trait object that lets room code stay oblivious to the
//! concrete socket type, and lets tests substitute an in-memory channel
//! instead of a real WebSocket.
//!
//! Outbound writes are queued through an unbounded channel rather than
//! performed directly from inside a room lock — `send` never blocks and
//! never holds the room mutex over I/O.

use tokio::sync::mpsc;

/// A bidirectional text-frame channel to one connected member.
pub trait Transport: Send + Sync {
    /// Queue a text frame for delivery. Returns `false` if the transport
    /// is already closed — callers must treat this as "silently skip",
    /// never as a hard error.
    fn send(&self, frame: String) -> bool;

    /// Whether the transport is still open.
    fn is_open(&self) -> bool;
}

/// A [`Transport`] backed by an unbounded mpsc channel feeding a writer
/// task that owns the actual socket half. This is what `WsTransport`
/// (src/relay/server.rs) hands to [`crate::room::Room`].
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl Transport for ChannelTransport {
    fn send(&self, frame: String) -> bool {
        self.tx.send(frame).is_ok()
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}
