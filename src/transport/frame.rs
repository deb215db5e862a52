//! Frame encoding and decoding.
//!
//! Every message starts with a fixed 16-byte big-endian header:
//!
//! ```text
//! ┌──────────┬──────────┬──────────────┬──────────────┬──────────────┐
//! │ Version  │ Type     │ Dst channel  │ Src channel  │ Length       │
//! │ (2B BE)  │ (2B BE)  │ (4B BE)      │ (4B BE)      │ (4B BE)      │
//! └──────────┴──────────┴──────────────┴──────────────┴──────────────┘
//! ```
//!
//! The codec validates neither `version` nor `type`; the multiplexer does,
//! so that a version mismatch can terminate the session and an unknown type
//! can be ignored instead of failing the decode. The `length` field is
//! informational: the receiver trusts the actual payload length.

use bytes::Bytes;
use thiserror::Error;

use crate::core::constants::{HEADER_SIZE, PROTOCOL_VERSION};

/// The six message types of the version-2 protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MsgType {
    /// Payload bytes for an open channel.
    Data = 1,
    /// Request to open a channel; `src_channel` is the sender's local id.
    Open = 2,
    /// Acknowledges an OPEN; `src_channel` is the acceptor's local id.
    Ack = 3,
    /// Close a channel; `src_channel` is 0 when rejecting an OPEN.
    Close = 4,
    /// Ask the peer to stop sending DATA on `dst_channel`.
    Pause = 5,
    /// Ask the peer to resume DATA on `dst_channel`.
    Resume = 6,
}

impl MsgType {
    /// Parse a message type from its wire value.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::Data),
            2 => Some(Self::Open),
            3 => Some(Self::Ack),
            4 => Some(Self::Close),
            5 => Some(Self::Pause),
            6 => Some(Self::Resume),
            _ => None,
        }
    }

    /// The wire value of this message type.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// A decoded frame header.
///
/// `msg_type` stays raw here so the multiplexer can distinguish "unknown
/// type, ignore" from "known type, dispatch".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol version of the frame.
    pub version: u16,
    /// Raw message type value.
    pub msg_type: u16,
    /// Destination channel at the receiver (0 for OPEN).
    pub dst_channel: u32,
    /// Sender's local channel id (0 on reject CLOSE).
    pub src_channel: u32,
    /// Declared payload length in bytes.
    pub length: u32,
}

impl FrameHeader {
    /// Create a version-2 header for the given type and routing.
    pub fn new(msg_type: MsgType, dst_channel: u32, src_channel: u32, length: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            msg_type: msg_type.as_u16(),
            dst_channel,
            src_channel,
            length,
        }
    }

    /// Serialize the header to its 16-byte wire form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.version.to_be_bytes());
        buf[2..4].copy_from_slice(&self.msg_type.to_be_bytes());
        buf[4..8].copy_from_slice(&self.dst_channel.to_be_bytes());
        buf[8..12].copy_from_slice(&self.src_channel.to_be_bytes());
        buf[12..16].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Parse a header from the first 16 bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            version: u16::from_be_bytes([bytes[0], bytes[1]]),
            msg_type: u16::from_be_bytes([bytes[2], bytes[3]]),
            dst_channel: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            src_channel: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            length: u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        })
    }
}

/// Encode a version-2 header for a message with `payload_len` payload bytes.
pub fn encode_header(
    msg_type: MsgType,
    dst_channel: u32,
    src_channel: u32,
    payload_len: usize,
) -> [u8; HEADER_SIZE] {
    FrameHeader::new(msg_type, dst_channel, src_channel, payload_len as u32).to_bytes()
}

/// Decode an inbound message into its header and payload.
///
/// Fails only when the message is shorter than the header. The payload is
/// whatever follows the header, regardless of the declared `length`.
pub fn decode_frame(bytes: Bytes) -> Result<(FrameHeader, Bytes), FrameError> {
    let header = FrameHeader::from_bytes(&bytes)?;
    let payload = bytes.slice(HEADER_SIZE..);
    Ok((header, payload))
}

/// Errors produced by the frame codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer cannot hold a complete header.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected size.
        expected: usize,
        /// Actual size received.
        actual: usize,
    },
}
