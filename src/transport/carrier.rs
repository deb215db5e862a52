//! The carrier seam: the injected message-oriented transport.
//!
//! The multiplexer does not open or negotiate its transport. The application
//! hands it an already-connected carrier — typically a WebSocket — that
//! delivers binary messages in order, answers pings with pongs, and reports
//! its own termination. Only the multiplexer task touches the carrier; it
//! owns the value for the lifetime of the session.

use std::future::Future;
use std::io;

use bytes::Bytes;

/// Inbound events delivered by a [`Carrier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CarrierEvent {
    /// A complete inbound message (all frames up to the end-of-message
    /// marker, reassembled).
    Message(Bytes),
    /// The peer answered a liveness probe.
    Pong,
    /// The carrier has terminated. No further events follow.
    Closed,
}

/// A full-duplex, message-oriented transport the multiplexer runs over.
///
/// Contract:
///
/// - `send` writes one frame; `fin` marks the end of a logical message.
///   Frames are binary and must not be compressed or reordered.
/// - `ping` triggers a liveness probe; the peer's answer arrives as
///   [`CarrierEvent::Pong`].
/// - `recv` yields the next inbound event and **must be cancel-safe**: the
///   multiplexer polls it inside `select!`, so a cancelled `recv` must not
///   lose an event. Returning `None` is equivalent to
///   [`CarrierEvent::Closed`].
pub trait Carrier: Send + 'static {
    /// Write one frame; `fin` marks the end of the logical message.
    fn send(&mut self, frame: Bytes, fin: bool) -> impl Future<Output = io::Result<()>> + Send;

    /// Trigger a liveness probe.
    fn ping(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Receive the next inbound event. Must be cancel-safe.
    fn recv(&mut self) -> impl Future<Output = Option<CarrierEvent>> + Send;
}
