//! Transport layer: wire framing and the carrier seam.
//!
//! This module owns everything that touches raw bytes:
//!
//! - **Frame codec**: [`FrameHeader`], [`MsgType`], [`encode_header`],
//!   [`decode_frame`] — the fixed 16-byte big-endian header format.
//! - **Carrier seam**: the [`Carrier`] trait describing the injected
//!   message-oriented transport, and [`CarrierEvent`], the inbound side.
//! - **In-memory carrier**: [`pipe`] builds a connected [`PipeCarrier`]
//!   pair for tests and examples.
//!
//! The layer is deliberately dumb: it neither validates protocol versions
//! nor message types. That is the multiplexer's job.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Stream Adapter               │
//! ├─────────────────────────────────────────┤
//! │           Multiplexer Core              │
//! ├─────────────────────────────────────────┤
//! │          Transport Layer                │  ← this module
//! │    frame codec, carrier interface       │
//! ├─────────────────────────────────────────┤
//! │   injected carrier (e.g. a WebSocket)   │
//! └─────────────────────────────────────────┘
//! ```

mod carrier;
mod frame;
mod pipe;

pub use carrier::{Carrier, CarrierEvent};
pub use frame::{decode_frame, encode_header, FrameError, FrameHeader, MsgType};
pub use pipe::{pipe, PipeCarrier};
