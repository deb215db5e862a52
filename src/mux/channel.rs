//! Channel-facing types: events, handles, counters, and open options.
//!
//! A [`Channel`] is the raw handle returned by [`Multiplexer::open`]: the
//! channel id, an ordered event mailbox, and shared byte counters. Most
//! consumers will wrap it in a [`MuxStream`](crate::stream::MuxStream)
//! instead of driving it directly.
//!
//! [`Multiplexer::open`]: crate::mux::Multiplexer::open

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::core::constants::DEFAULT_ACK_TIMEOUT;
use crate::core::MuxError;
use crate::mux::multiplexer::Command;

/// Events delivered to a channel, in order.
///
/// For any channel the mailbox obeys: [`Opened`](ChannelEvent::Opened)
/// strictly precedes [`Data`](ChannelEvent::Data) and
/// [`FlowControl`](ChannelEvent::FlowControl), which strictly precede
/// [`Closed`](ChannelEvent::Closed); an [`Error`](ChannelEvent::Error)
/// always immediately precedes its [`Closed`](ChannelEvent::Closed).
/// `Closed` is final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel is open; `peer` is the peer's local id for it.
    Opened {
        /// The peer's id for this channel (our `dst_channel`).
        peer: u32,
    },
    /// Payload bytes from the peer.
    Data(Bytes),
    /// The peer asked us to pause (`true`) or resume (`false`) sending.
    FlowControl {
        /// `true` for PAUSE, `false` for RESUME.
        pause: bool,
    },
    /// The channel failed; a `Closed` event follows immediately.
    Error(MuxError),
    /// The channel is gone. No further events follow.
    Closed,
}

/// Monotone per-channel byte counters, shared between the multiplexer task
/// and channel handles.
///
/// Written only by the multiplexer task; read from anywhere with relaxed
/// ordering (stale reads are tolerated, each field is consistent).
#[derive(Debug, Default)]
pub(crate) struct ChannelCounters {
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
}

impl ChannelCounters {
    pub(crate) fn add_written(&self, n: u64) {
        self.bytes_written.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_read(&self, n: u64) {
        self.bytes_read.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub(crate) fn read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }
}

/// A point-in-time snapshot of a channel's byte counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Total payload bytes accepted by the carrier for this channel.
    pub bytes_written: u64,
    /// Total payload bytes delivered by the peer on this channel.
    pub bytes_read: u64,
}

/// Options for opening a channel.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Ack timeout when initiating. Ignored when `dst_channel` is set.
    pub timeout: Duration,
    /// When set, accept this pre-announced peer channel instead of
    /// initiating a new one.
    pub dst_channel: Option<u32>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_ACK_TIMEOUT,
            dst_channel: None,
        }
    }
}

/// A raw handle to one multiplexed channel.
///
/// Dropping the handle does not close the channel; use
/// [`Multiplexer::close`](crate::mux::Multiplexer::close) or wrap the handle
/// in a [`MuxStream`](crate::stream::MuxStream), whose teardown does.
#[derive(Debug)]
pub struct Channel {
    pub(crate) id: u32,
    pub(crate) events: mpsc::UnboundedReceiver<ChannelEvent>,
    pub(crate) cmd: mpsc::UnboundedSender<Command>,
    pub(crate) counters: Arc<ChannelCounters>,
}

impl Channel {
    /// The local id of this channel.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Receive the next channel event.
    ///
    /// Returns `None` after [`ChannelEvent::Closed`] has been delivered and
    /// the multiplexer is gone.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Total payload bytes the carrier has accepted for this channel.
    pub fn bytes_written(&self) -> u64 {
        self.counters.written()
    }

    /// Total payload bytes the peer has delivered on this channel.
    pub fn bytes_read(&self) -> u64 {
        self.counters.read()
    }
}
