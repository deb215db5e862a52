//! Protocol and runtime constants.
//!
//! The wire-level values are fixed by the protocol and MUST NOT be changed;
//! the runtime defaults are overridable through [`crate::MultiplexerConfig`]
//! and [`crate::StreamOptions`].

use std::time::Duration;

// =============================================================================
// WIRE PROTOCOL
// =============================================================================

/// Protocol version carried in every frame header.
pub const PROTOCOL_VERSION: u16 = 2;

/// Fixed frame header size in bytes.
pub const HEADER_SIZE: usize = 16;

/// Reserved channel id meaning "no channel" in headers.
///
/// OPEN frames carry it as `dst_channel`; CLOSE frames rejecting an OPEN
/// carry it as `src_channel`.
pub const CHANNEL_NONE: u32 = 0;

/// Smallest valid channel id.
pub const MIN_CHANNEL_ID: u32 = 1;

/// Largest valid channel id. Allocation wraps back to [`MIN_CHANNEL_ID`].
pub const MAX_CHANNEL_ID: u32 = u32::MAX;

/// Prefix shared by every on-wire error code string.
pub const ERROR_CODE_PREFIX: &str = "ERR_WSM_";

// =============================================================================
// RUNTIME DEFAULTS
// =============================================================================

/// Default cap on simultaneously open channels per session.
pub const DEFAULT_MAX_CHANNELS: usize = 65535;

/// Default carrier ping period.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_millis(10000);

/// Default ack timeout when initiating a channel open.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default high-water mark for the stream adapter's read and write buffers.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;
