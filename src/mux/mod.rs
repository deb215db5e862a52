//! Multiplexer layer: channel allocation, the channel table, liveness
//! supervision, and the session task.
//!
//! The entry point is [`Multiplexer::new`], which takes an
//! already-connected [`Carrier`](crate::transport::Carrier) and returns an
//! operation-oriented handle plus the session event stream. Channels opened
//! through the handle arrive as [`Channel`] mailboxes; the peer's channels
//! arrive as ready-made streams in
//! [`SessionEvent::Connection`].

mod allocator;
pub(crate) mod channel;
mod keepalive;
pub(crate) mod multiplexer;
pub(crate) mod table;

pub use channel::{Channel, ChannelEvent, ChannelInfo, OpenOptions};
pub use multiplexer::{
    Multiplexer, MultiplexerConfig, MultiplexerConfigBuilder, SessionEvent, SessionEvents,
};
