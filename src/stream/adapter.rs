//! The duplex adapter: one channel as a byte stream.
//!
//! [`MuxStream`] wraps a [`Channel`] and implements `AsyncRead` +
//! `AsyncWrite`, so a multiplexed channel composes with anything that
//! speaks tokio byte streams. The adapter owns the backpressure coupling:
//!
//! - **Read side**: inbound DATA queues internally; when the queue passes
//!   the high-water mark the peer is asked to PAUSE, and draining it back
//!   below the mark sends RESUME.
//! - **Write side**: writes issued while the channel is still opening, or
//!   while the peer has us paused, are buffered (bounded by the same
//!   high-water mark — `poll_write` returns `Pending` above it) and drained
//!   in order once the channel opens or the peer uncorks.
//!
//! Lifecycle mirrors the channel: a remote close ends the read side at EOF
//! and fails further writes; channel errors surface once as `io::Error`s on
//! the next read or write.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant, Sleep};

use crate::core::constants::{DEFAULT_ACK_TIMEOUT, DEFAULT_HIGH_WATER_MARK};
use crate::core::MuxError;
use crate::mux::channel::{Channel, ChannelCounters, ChannelEvent};
use crate::mux::multiplexer::Command;

/// Options for opening a channel as a stream.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Ack timeout when initiating. Ignored when `dst_channel` is set.
    pub timeout: Duration,
    /// When set, accept this pre-announced peer channel instead of
    /// initiating.
    pub dst_channel: Option<u32>,
    /// Byte threshold for read-side PAUSE and write-side buffering.
    pub high_water_mark: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_ACK_TIMEOUT,
            dst_channel: None,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Opening,
    Open,
    Closed,
}

/// A multiplexed channel presented as a duplex byte stream.
#[derive(Debug)]
pub struct MuxStream {
    id: u32,
    peer: u32,
    cmd: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    counters: Arc<ChannelCounters>,
    state: StreamState,
    high_water_mark: usize,

    read_queue: VecDeque<Bytes>,
    read_queued: usize,
    peer_paused: bool,

    write_queue: VecDeque<Bytes>,
    write_queued: usize,
    corked: bool,
    close_sent: bool,

    destroyed: bool,
    pending_error: Option<MuxError>,

    idle_timeout: Option<Duration>,
    idle_sleep: Option<Pin<Box<Sleep>>>,
    refs: u32,

    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

impl MuxStream {
    /// Wrap a raw channel handle as a byte stream.
    pub fn from_channel(channel: Channel, options: StreamOptions) -> Self {
        let Channel {
            id,
            events,
            cmd,
            counters,
        } = channel;
        Self {
            id,
            peer: 0,
            cmd,
            events,
            counters,
            state: StreamState::Opening,
            high_water_mark: options.high_water_mark,
            read_queue: VecDeque::new(),
            read_queued: 0,
            peer_paused: false,
            write_queue: VecDeque::new(),
            write_queued: 0,
            corked: false,
            close_sent: false,
            destroyed: false,
            pending_error: None,
            idle_timeout: None,
            idle_sleep: None,
            refs: 1,
            read_waker: None,
            write_waker: None,
        }
    }

    /// The local channel id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Wait until the channel handshake completes.
    ///
    /// Resolves immediately for accepted channels. Fails with the channel's
    /// error when the open times out or is rejected.
    pub async fn ready(&mut self) -> io::Result<()> {
        std::future::poll_fn(|cx| {
            self.process_events(cx);
            if let Some(err) = self.pending_error.take() {
                return Poll::Ready(Err(err.to_io()));
            }
            if self.destroyed || self.state == StreamState::Closed {
                return Poll::Ready(Err(io::ErrorKind::NotConnected.into()));
            }
            if self.state == StreamState::Open {
                return Poll::Ready(Ok(()));
            }
            Poll::Pending
        })
        .await
    }

    /// The peer's id for this channel, once open.
    pub fn peer_id(&self) -> Option<u32> {
        (self.peer != 0).then_some(self.peer)
    }

    /// Total payload bytes the carrier has accepted for this channel.
    pub fn bytes_written(&self) -> u64 {
        self.counters.written()
    }

    /// Total payload bytes the peer has delivered on this channel.
    pub fn bytes_read(&self) -> u64 {
        self.counters.read()
    }

    /// Install or clear the sliding inactivity timer.
    ///
    /// Any read, write, or channel open resets it. On expiry the next
    /// pending read or write returns `io::ErrorKind::TimedOut` once; the
    /// stream stays usable and fresh activity re-arms the timer.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.idle_timeout = timeout;
        self.rearm_idle();
    }

    /// API-compat switch: enabling keep-alive disables the inactivity
    /// timeout. The carrier-level liveness probing is always on and owned
    /// by the multiplexer.
    pub fn set_keep_alive(&mut self, enabled: bool) {
        if enabled {
            self.set_timeout(None);
        }
    }

    /// Increment the reference count.
    pub fn retain(&mut self) {
        if self.refs == 0 {
            self.refs = 1;
            self.rearm_idle();
        } else {
            self.refs += 1;
        }
    }

    /// Decrement the reference count. At zero the inactivity timer is
    /// disarmed so a pooled, idle adapter holds no timers.
    pub fn release(&mut self) {
        self.refs = self.refs.saturating_sub(1);
        if self.refs == 0 {
            self.idle_sleep = None;
        }
    }

    /// API-compat no-op: a multiplexed channel has no socket address.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// API-compat no-op.
    pub fn set_nodelay(&mut self, _nodelay: bool) {}

    /// API-compat no-op; always `false`.
    pub fn nodelay(&self) -> bool {
        false
    }

    /// Tear the stream down.
    ///
    /// Idempotent. Closes the channel; a supplied error surfaces on the
    /// next read or write before the stream reports itself closed.
    pub fn destroy(&mut self, error: Option<MuxError>) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.idle_timeout = None;
        self.idle_sleep = None;
        self.read_queue.clear();
        self.read_queued = 0;
        self.write_queue.clear();
        self.write_queued = 0;
        if !self.close_sent {
            self.close_sent = true;
            let _ = self.cmd.send(Command::Close {
                id: self.id,
                reply: None,
            });
        }
        if let Some(err) = error {
            self.pending_error = Some(err);
        }
        self.wake_read();
        self.wake_write();
    }

    fn wake_read(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }

    fn wake_write(&mut self) {
        if let Some(waker) = self.write_waker.take() {
            waker.wake();
        }
    }

    fn rearm_idle(&mut self) {
        match self.idle_timeout {
            Some(timeout) if self.refs > 0 && !self.destroyed => {
                let deadline = Instant::now() + timeout;
                match self.idle_sleep.as_mut() {
                    Some(idle) => idle.as_mut().reset(deadline),
                    None => self.idle_sleep = Some(Box::pin(sleep(timeout))),
                }
            }
            _ => self.idle_sleep = None,
        }
    }

    fn touch_activity(&mut self) {
        if self.idle_timeout.is_some() {
            self.rearm_idle();
        }
    }

    /// Poll the inactivity timer; `true` exactly once per expiry.
    fn poll_idle(&mut self, cx: &mut Context<'_>) -> bool {
        if let Some(idle) = self.idle_sleep.as_mut() {
            if idle.as_mut().poll(cx).is_ready() {
                self.idle_sleep = None;
                return true;
            }
        }
        false
    }

    /// Drain the channel mailbox without blocking.
    fn process_events(&mut self, cx: &mut Context<'_>) {
        loop {
            match self.events.poll_recv(cx) {
                Poll::Ready(Some(event)) => self.on_event(event),
                Poll::Ready(None) => {
                    self.state = StreamState::Closed;
                    break;
                }
                Poll::Pending => break,
            }
        }
    }

    fn on_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened { peer } => {
                self.peer = peer;
                if self.state == StreamState::Opening {
                    self.state = StreamState::Open;
                }
                self.touch_activity();
                self.flush_write_queue();
            }
            ChannelEvent::Data(bytes) => {
                self.read_queued += bytes.len();
                self.read_queue.push_back(bytes);
                if self.read_queued > self.high_water_mark && !self.peer_paused {
                    self.peer_paused = true;
                    let _ = self.cmd.send(Command::FlowControl {
                        id: self.id,
                        stop: true,
                        reply: None,
                    });
                }
                self.touch_activity();
                self.wake_read();
            }
            ChannelEvent::FlowControl { pause } => {
                self.corked = pause;
                if !pause {
                    self.flush_write_queue();
                }
            }
            ChannelEvent::Error(err) => {
                // Errors arriving after a local destroy are stale.
                if !self.destroyed && self.pending_error.is_none() {
                    self.pending_error = Some(err);
                }
                self.wake_read();
                self.wake_write();
            }
            ChannelEvent::Closed => {
                self.state = StreamState::Closed;
                self.wake_read();
                self.wake_write();
            }
        }
    }

    /// Hand buffered writes to the multiplexer, oldest first.
    fn flush_write_queue(&mut self) {
        if self.state != StreamState::Open || self.corked {
            return;
        }
        while let Some(chunk) = self.write_queue.pop_front() {
            self.write_queued -= chunk.len();
            if self.send_chunk(chunk).is_err() {
                self.state = StreamState::Closed;
                break;
            }
        }
        self.wake_write();
    }

    fn send_chunk(&self, chunk: Bytes) -> Result<(), ()> {
        self.cmd
            .send(Command::Send {
                id: self.id,
                segments: vec![chunk],
                reply: None,
            })
            .map_err(|_| ())
    }

    fn maybe_resume(&mut self) {
        if self.peer_paused && self.read_queued < self.high_water_mark {
            self.peer_paused = false;
            let _ = self.cmd.send(Command::FlowControl {
                id: self.id,
                stop: false,
                reply: None,
            });
        }
    }

    /// Common write path for plain and vectored writes: `chunk` is one DATA
    /// message.
    fn write_chunk(&mut self, cx: &mut Context<'_>, chunk: Bytes) -> Poll<io::Result<usize>> {
        self.process_events(cx);

        if let Some(err) = self.pending_error.take() {
            return Poll::Ready(Err(err.to_io()));
        }
        if self.destroyed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "write to a destroyed stream",
            )));
        }
        if self.close_sent || self.state == StreamState::Closed {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }

        let len = chunk.len();
        if len == 0 {
            return Poll::Ready(Ok(0));
        }

        if self.state == StreamState::Opening || self.corked {
            if self.write_queued >= self.high_water_mark {
                if self.poll_idle(cx) {
                    return Poll::Ready(Err(io::ErrorKind::TimedOut.into()));
                }
                self.write_waker = Some(cx.waker().clone());
                return Poll::Pending;
            }
            self.write_queued += len;
            self.write_queue.push_back(chunk);
            self.touch_activity();
            return Poll::Ready(Ok(len));
        }

        if self.send_chunk(chunk).is_err() {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        self.touch_activity();
        Poll::Ready(Ok(len))
    }
}

impl AsyncRead for MuxStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.process_events(cx);

        if this.destroyed {
            return match this.pending_error.take() {
                Some(err) => Poll::Ready(Err(err.to_io())),
                None => Poll::Ready(Ok(())),
            };
        }
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        if let Some(front) = this.read_queue.front_mut() {
            let n = front.len().min(buf.remaining());
            buf.put_slice(&front[..n]);
            front.advance(n);
            if front.is_empty() {
                this.read_queue.pop_front();
            }
            this.read_queued -= n;
            this.maybe_resume();
            this.touch_activity();
            return Poll::Ready(Ok(()));
        }

        if let Some(err) = this.pending_error.take() {
            return Poll::Ready(Err(err.to_io()));
        }
        if this.state == StreamState::Closed {
            return Poll::Ready(Ok(()));
        }
        if this.poll_idle(cx) {
            return Poll::Ready(Err(io::ErrorKind::TimedOut.into()));
        }
        this.read_waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl AsyncWrite for MuxStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().write_chunk(cx, Bytes::copy_from_slice(buf))
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        // One DATA message regardless of how the caller sliced the bytes.
        let mut chunk = BytesMut::new();
        for slice in bufs {
            chunk.extend_from_slice(slice);
        }
        self.get_mut().write_chunk(cx, chunk.freeze())
    }

    fn is_write_vectored(&self) -> bool {
        true
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.process_events(cx);

        if this.destroyed {
            return Poll::Ready(Err(io::ErrorKind::NotConnected.into()));
        }
        if this.write_queue.is_empty() {
            return Poll::Ready(Ok(()));
        }
        if this.state == StreamState::Closed {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        this.write_waker = Some(cx.waker().clone());
        Poll::Pending
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.process_events(cx);

        if this.destroyed || this.state == StreamState::Closed {
            this.write_queue.clear();
            this.write_queued = 0;
            return Poll::Ready(Ok(()));
        }
        if !this.write_queue.is_empty() {
            this.write_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        if !this.close_sent {
            this.close_sent = true;
            let _ = this.cmd.send(Command::Close {
                id: this.id,
                reply: None,
            });
        }
        Poll::Ready(Ok(()))
    }
}

impl Drop for MuxStream {
    fn drop(&mut self) {
        if !self.close_sent {
            let _ = self.cmd.send(Command::Close {
                id: self.id,
                reply: None,
            });
        }
    }
}
