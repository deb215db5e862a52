//! Error taxonomy for the multiplexer and stream layers.
//!
//! Every condition the protocol can surface has a typed kind. Kinds that
//! travel over the wire (inside CLOSE payloads) map to and from a UTF-8 code
//! string; a CLOSE carrying an unknown code decodes to [`MuxError::Remote`].
//! Two kinds ([`MuxError::OpenChannelRejected`] and
//! [`MuxError::ChannelClosedByPeer`]) wrap the peer's error when one was
//! reconstructed from the payload.

use std::io;

use thiserror::Error;

/// Result alias for multiplexer operations.
pub type Result<T> = std::result::Result<T, MuxError>;

/// Errors surfaced by the multiplexer, the channels, and the stream adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MuxError {
    /// The peer stopped answering pings. Terminates the session.
    #[error("ping timeout after {idle_ms} ms of carrier silence")]
    PingTimeout {
        /// Milliseconds since the last pong when the supervisor gave up.
        idle_ms: u64,
    },

    /// The carrier closed before an orderly destroy. Terminates the session.
    #[error("carrier closed unexpectedly")]
    SocketClosedUnexpectedly,

    /// The carrier (or the multiplexer task) is gone.
    #[error("carrier closed")]
    SocketClosed,

    /// An inbound frame carried a version other than 2. Terminates the
    /// session.
    #[error("unsupported protocol version {version}")]
    UnsupportedProtocolVersion {
        /// The version field of the offending frame.
        version: u16,
    },

    /// The channel table is full; no id could be allocated.
    #[error("no channels available")]
    NoChannels,

    /// The peer never acknowledged our OPEN within the ack timeout.
    #[error("channel open timed out")]
    OpenChannelTimeout,

    /// The peer answered our OPEN with a CLOSE.
    #[error("channel open rejected by peer")]
    OpenChannelRejected {
        /// The peer's error, when the CLOSE payload carried one.
        remote: Option<Box<MuxError>>,
    },

    /// The operation requires an open channel and the channel is opening or
    /// absent.
    #[error("channel not open")]
    ChannelNotOpen,

    /// The peer closed the channel and attached an error.
    #[error("channel closed by peer")]
    ChannelClosedByPeer {
        /// The peer's error reconstructed from the CLOSE payload.
        remote: Option<Box<MuxError>>,
    },

    /// An OPEN arrived for a peer channel that is already bound locally.
    #[error("peer channel id already in use")]
    OpenChannelReuse,

    /// A frame's source channel does not match the receiver's recorded peer
    /// id. Both involved channels are closed.
    #[error("channel source/destination mismatch")]
    ChannelMismatch,

    /// A peer error whose wire code this implementation does not know.
    #[error("remote error: {0}")]
    Remote(String),
}

impl MuxError {
    /// The on-wire code string for this error, carried in CLOSE payloads.
    pub fn code(&self) -> &str {
        match self {
            MuxError::PingTimeout { .. } => "ERR_WSM_PING_TIMEOUT",
            MuxError::SocketClosedUnexpectedly => "ERR_WSM_SOCKET_CLOSED_UNEXPECTEDLY",
            MuxError::SocketClosed => "ERR_WSM_SOCKET_CLOSED",
            MuxError::UnsupportedProtocolVersion { .. } => "ERR_WSM_UNSUPPORTED_PROTOCOL_VERSION",
            MuxError::NoChannels => "ERR_WSM_NO_CHANNELS",
            MuxError::OpenChannelTimeout => "ERR_WSM_OPEN_CHANNEL_TIMEOUT",
            MuxError::OpenChannelRejected { .. } => "ERR_WSM_OPEN_CHANNEL_REJECTED",
            MuxError::ChannelNotOpen => "ERR_WSM_CHANNEL_NOT_OPEN",
            MuxError::ChannelClosedByPeer { .. } => "ERR_WSM_CHANNEL_CLOSED_BY_PEER",
            MuxError::OpenChannelReuse => "ERR_WSM_OPEN_CHANNEL_REUSE",
            MuxError::ChannelMismatch => "ERR_WSM_CHANNEL_MISMATCH",
            MuxError::Remote(code) => code,
        }
    }

    /// Reconstruct an error from an on-wire code string.
    ///
    /// Unknown codes are preserved verbatim inside [`MuxError::Remote`].
    pub fn from_code(code: &str) -> Self {
        match code {
            "ERR_WSM_PING_TIMEOUT" => MuxError::PingTimeout { idle_ms: 0 },
            "ERR_WSM_SOCKET_CLOSED_UNEXPECTEDLY" => MuxError::SocketClosedUnexpectedly,
            "ERR_WSM_SOCKET_CLOSED" => MuxError::SocketClosed,
            "ERR_WSM_UNSUPPORTED_PROTOCOL_VERSION" => {
                MuxError::UnsupportedProtocolVersion { version: 0 }
            }
            "ERR_WSM_NO_CHANNELS" => MuxError::NoChannels,
            "ERR_WSM_OPEN_CHANNEL_TIMEOUT" => MuxError::OpenChannelTimeout,
            "ERR_WSM_OPEN_CHANNEL_REJECTED" => MuxError::OpenChannelRejected { remote: None },
            "ERR_WSM_CHANNEL_NOT_OPEN" => MuxError::ChannelNotOpen,
            "ERR_WSM_CHANNEL_CLOSED_BY_PEER" => MuxError::ChannelClosedByPeer { remote: None },
            "ERR_WSM_OPEN_CHANNEL_REUSE" => MuxError::OpenChannelReuse,
            "ERR_WSM_CHANNEL_MISMATCH" => MuxError::ChannelMismatch,
            other => MuxError::Remote(other.to_string()),
        }
    }

    /// The wrapped peer error, for kinds that carry one.
    pub fn remote(&self) -> Option<&MuxError> {
        match self {
            MuxError::OpenChannelRejected { remote } | MuxError::ChannelClosedByPeer { remote } => {
                remote.as_deref()
            }
            _ => None,
        }
    }

    /// Check if this error terminates the whole session rather than a single
    /// channel.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MuxError::PingTimeout { .. }
                | MuxError::SocketClosedUnexpectedly
                | MuxError::UnsupportedProtocolVersion { .. }
        )
    }

    /// Map this error to the POSIX-like `io::Error` the stream adapter
    /// exposes to byte-stream consumers.
    ///
    /// `NoChannels` (EMFILE territory) has no stable `io::ErrorKind`; it and
    /// every unlisted kind pass through as [`io::ErrorKind::Other`] with
    /// `self` as the source.
    pub fn to_io(&self) -> io::Error {
        let kind = match self {
            MuxError::OpenChannelTimeout => io::ErrorKind::TimedOut,
            MuxError::OpenChannelRejected { .. } => io::ErrorKind::ConnectionRefused,
            MuxError::ChannelNotOpen => io::ErrorKind::NotConnected,
            MuxError::ChannelClosedByPeer { .. } => io::ErrorKind::ConnectionReset,
            MuxError::OpenChannelReuse => io::ErrorKind::AddrInUse,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self.clone())
    }
}

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `alive_threshold` must exceed `keep_alive` or the supervisor would
    /// expire a session that is answering every ping.
    #[error("alive_threshold ({threshold_ms} ms) must exceed keep_alive ({keep_alive_ms} ms)")]
    AliveThreshold {
        /// Configured pong-idle cap in ms.
        threshold_ms: u64,
        /// Configured ping period in ms.
        keep_alive_ms: u64,
    },
}
