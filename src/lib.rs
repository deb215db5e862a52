//! # wsmux
//!
//! Channel multiplexing over a single message-oriented carrier.
//!
//! wsmux runs many independent, bidirectional, ordered byte streams
//! ("channels") over one already-connected full-duplex transport — anything
//! WebSocket-shaped that delivers binary frames in order and answers pings
//! with pongs. It provides:
//!
//! - **Multiplexer**: an explicit channel API (open, close, send, flow
//!   control) with per-channel byte counters and liveness supervision of
//!   the carrier.
//! - **Streams**: every channel doubles as a tokio `AsyncRead + AsyncWrite`
//!   byte stream with backpressure in both directions, inactivity timeouts,
//!   and graceful teardown.
//!
//! ## Layers
//!
//! - [`core`]: constants and the error taxonomy
//! - [`transport`]: frame codec and the injected [`Carrier`] seam
//! - [`mux`]: channel table, liveness supervision, and the session task
//! - [`stream`]: the duplex adapter
//!
//! ## Example
//!
//! ```no_run
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//! use wsmux::{pipe, Multiplexer, MultiplexerConfig, SessionEvent, StreamOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Two ends of an in-memory carrier; in production this is the
//!     // application's connected WebSocket.
//!     let (left, right) = pipe();
//!     let (a, _a_events) = Multiplexer::new(left, MultiplexerConfig::default());
//!     let (_b, mut b_events) = Multiplexer::new(right, MultiplexerConfig::default());
//!
//!     let mut stream = a.open_stream(StreamOptions::default()).await?;
//!     stream.write_all(b"hello").await?;
//!     stream.flush().await?;
//!
//!     if let Some(SessionEvent::Connection(mut peer)) = b_events.recv().await {
//!         let mut buf = [0u8; 5];
//!         peer.read_exact(&mut buf).await?;
//!         assert_eq!(&buf, b"hello");
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod core;
pub mod mux;
pub mod stream;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::constants::PROTOCOL_VERSION;
    pub use crate::core::{ConfigError, MuxError, Result};
    pub use crate::mux::{
        Channel, ChannelEvent, ChannelInfo, Multiplexer, MultiplexerConfig, OpenOptions,
        SessionEvent, SessionEvents,
    };
    pub use crate::stream::{MuxStream, StreamOptions};
    pub use crate::transport::{pipe, Carrier, CarrierEvent, PipeCarrier};
}

// Re-export commonly used items at crate root.
pub use crate::core::{ConfigError, MuxError, Result};
pub use crate::mux::{
    Channel, ChannelEvent, ChannelInfo, Multiplexer, MultiplexerConfig, MultiplexerConfigBuilder,
    OpenOptions, SessionEvent, SessionEvents,
};
pub use crate::stream::{MuxStream, StreamOptions};
pub use crate::transport::{pipe, Carrier, CarrierEvent, FrameHeader, MsgType, PipeCarrier};
