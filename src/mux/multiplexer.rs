//! The multiplexer core: session task, channel API, and inbound dispatch.
//!
//! [`Multiplexer::new`] spawns a single task that owns the carrier and the
//! channel table. Every state transition — API commands, inbound frames,
//! ack timers, keepalive ticks — is serialized through that task's
//! `select!` loop, so channel state never needs a lock. The returned
//! [`Multiplexer`] handle forwards operations over a command mailbox and
//! awaits replies; [`SessionEvents`] carries session-level notifications
//! (inbound channels, fatal errors, shutdown) back to the application.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, debug_span, trace, warn, Instrument};

use crate::core::constants::{CHANNEL_NONE, DEFAULT_KEEP_ALIVE, DEFAULT_MAX_CHANNELS, PROTOCOL_VERSION};
use crate::core::{ConfigError, MuxError, Result};
use crate::mux::allocator::allocate;
use crate::mux::channel::{Channel, ChannelCounters, ChannelEvent, ChannelInfo, OpenOptions};
use crate::mux::keepalive::Keepalive;
use crate::mux::table::{ChannelContext, ChannelTable};
use crate::stream::{MuxStream, StreamOptions};
use crate::transport::{decode_frame, encode_header, Carrier, CarrierEvent, FrameHeader, MsgType};

/// Session-level configuration.
#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    /// Opaque label for diagnostics; appears in the session's tracing span.
    pub reference: String,
    /// Hard cap on simultaneously open channels.
    pub max_channels: usize,
    /// Carrier ping period.
    pub keep_alive: Duration,
    /// Pong idle cap; must exceed `keep_alive`.
    pub alive_threshold: Duration,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            reference: String::new(),
            max_channels: DEFAULT_MAX_CHANNELS,
            keep_alive: DEFAULT_KEEP_ALIVE,
            alive_threshold: DEFAULT_KEEP_ALIVE * 2,
        }
    }
}

impl MultiplexerConfig {
    /// Start building a configuration.
    pub fn builder() -> MultiplexerConfigBuilder {
        MultiplexerConfigBuilder::new()
    }
}

/// Builder for [`MultiplexerConfig`].
#[derive(Debug, Default)]
pub struct MultiplexerConfigBuilder {
    reference: Option<String>,
    max_channels: Option<usize>,
    keep_alive: Option<Duration>,
    alive_threshold: Option<Duration>,
}

impl MultiplexerConfigBuilder {
    /// Create a builder with every field at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the diagnostic label.
    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Set the channel cap.
    pub fn max_channels(mut self, max_channels: usize) -> Self {
        self.max_channels = Some(max_channels);
        self
    }

    /// Set the ping period.
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    /// Set the pong idle cap. Defaults to twice the ping period.
    pub fn alive_threshold(mut self, alive_threshold: Duration) -> Self {
        self.alive_threshold = Some(alive_threshold);
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> std::result::Result<MultiplexerConfig, ConfigError> {
        let keep_alive = self.keep_alive.unwrap_or(DEFAULT_KEEP_ALIVE);
        let alive_threshold = self.alive_threshold.unwrap_or(keep_alive * 2);
        if alive_threshold <= keep_alive {
            return Err(ConfigError::AliveThreshold {
                threshold_ms: alive_threshold.as_millis() as u64,
                keep_alive_ms: keep_alive.as_millis() as u64,
            });
        }
        Ok(MultiplexerConfig {
            reference: self.reference.unwrap_or_default(),
            max_channels: self.max_channels.unwrap_or(DEFAULT_MAX_CHANNELS),
            keep_alive,
            alive_threshold,
        })
    }
}

/// Session-level notifications.
#[derive(Debug)]
pub enum SessionEvent {
    /// The peer opened a channel; it arrives pre-wrapped as a stream.
    Connection(MuxStream),
    /// A fatal session error. A `Closed` event follows.
    Error(MuxError),
    /// The session is over. No further events follow.
    Closed,
}

/// Receiver half for [`SessionEvent`]s, returned by [`Multiplexer::new`].
#[derive(Debug)]
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    /// Receive the next session event.
    ///
    /// Returns `None` once the session is closed and all events are drained.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }
}

/// Commands accepted by the multiplexer task.
#[derive(Debug)]
pub(crate) enum Command {
    Open {
        options: OpenOptions,
        reply: oneshot::Sender<Result<Channel>>,
    },
    Close {
        id: u32,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Send {
        id: u32,
        segments: Vec<Bytes>,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    FlowControl {
        id: u32,
        stop: bool,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Info {
        id: u32,
        reply: oneshot::Sender<Option<ChannelInfo>>,
    },
    AckExpired {
        id: u32,
    },
    Destroy {
        reply: Option<oneshot::Sender<()>>,
    },
}

/// Handle to a running multiplexer session.
///
/// All operations forward to the session task. Dropping the handle destroys
/// the session (open channels are closed gracefully), so keep it alive for
/// as long as any of its channels matter.
#[derive(Debug)]
pub struct Multiplexer {
    cmd: mpsc::UnboundedSender<Command>,
}

impl Multiplexer {
    /// Spawn a multiplexer session over an already-connected carrier.
    ///
    /// Must be called within a tokio runtime. An `alive_threshold` that does
    /// not exceed `keep_alive` (possible by constructing the config
    /// directly) falls back to twice the ping period.
    pub fn new<C: Carrier>(carrier: C, config: MultiplexerConfig) -> (Self, SessionEvents) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();

        let threshold = if config.alive_threshold > config.keep_alive {
            config.alive_threshold
        } else {
            warn!(
                threshold_ms = config.alive_threshold.as_millis() as u64,
                keep_alive_ms = config.keep_alive.as_millis() as u64,
                "alive_threshold does not exceed keep_alive, using twice the ping period"
            );
            config.keep_alive * 2
        };
        let span = debug_span!("mux", reference = %config.reference);
        let task = MuxTask {
            carrier,
            table: ChannelTable::new(config.max_channels),
            commands: cmd_rx,
            cmd_tx: cmd_tx.clone(),
            session: session_tx,
            keepalive: Keepalive::new(config.keep_alive, threshold),
            destroyed: false,
        };
        tokio::spawn(task.run().instrument(span));

        (Self { cmd: cmd_tx }, SessionEvents { rx: session_rx })
    }

    /// Open a channel.
    ///
    /// Without `dst_channel` this initiates: the returned [`Channel`] is
    /// opening and delivers [`ChannelEvent::Opened`] once the peer
    /// acknowledges, or an error event on timeout or rejection. With
    /// `dst_channel` it accepts a pre-announced peer channel and the
    /// `Opened` event is already queued.
    pub async fn open(&self, options: OpenOptions) -> Result<Channel> {
        let (reply, rx) = oneshot::channel();
        self.cmd
            .send(Command::Open { options, reply })
            .map_err(|_| MuxError::SocketClosed)?;
        rx.await.map_err(|_| MuxError::SocketClosed)?
    }

    /// Open a channel and wrap it as a byte stream.
    pub async fn open_stream(&self, options: StreamOptions) -> Result<MuxStream> {
        let open = OpenOptions {
            timeout: options.timeout,
            dst_channel: options.dst_channel,
        };
        let channel = self.open(open).await?;
        Ok(MuxStream::from_channel(channel, options))
    }

    /// Close an open channel. Fails with [`MuxError::ChannelNotOpen`] when
    /// the channel is still opening or absent.
    pub async fn close(&self, id: u32) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd
            .send(Command::Close {
                id,
                reply: Some(reply),
            })
            .map_err(|_| MuxError::SocketClosed)?;
        rx.await.map_err(|_| MuxError::SocketClosed)?
    }

    /// Send payload bytes on an open channel.
    pub async fn send(&self, id: u32, data: Bytes) -> Result<()> {
        self.send_vectored(id, vec![data]).await
    }

    /// Send several payload segments as a single DATA message.
    pub async fn send_vectored(&self, id: u32, segments: Vec<Bytes>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd
            .send(Command::Send {
                id,
                segments,
                reply: Some(reply),
            })
            .map_err(|_| MuxError::SocketClosed)?;
        rx.await.map_err(|_| MuxError::SocketClosed)?
    }

    /// Ask the peer to pause (`stop = true`) or resume DATA on a channel.
    pub async fn flow_control(&self, id: u32, stop: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd
            .send(Command::FlowControl {
                id,
                stop,
                reply: Some(reply),
            })
            .map_err(|_| MuxError::SocketClosed)?;
        rx.await.map_err(|_| MuxError::SocketClosed)?
    }

    /// Snapshot a channel's byte counters, or `None` for an unknown channel.
    pub async fn channel_info(&self, id: u32) -> Option<ChannelInfo> {
        let (reply, rx) = oneshot::channel();
        self.cmd.send(Command::Info { id, reply }).ok()?;
        rx.await.ok().flatten()
    }

    /// Gracefully shut the session down: every open channel is closed
    /// (CLOSE sent to the peer), the supervisor stops, and
    /// [`SessionEvent::Closed`] is emitted. Idempotent.
    pub async fn destroy(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd
            .send(Command::Destroy { reply: Some(reply) })
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Whether the session task has terminated.
    pub fn is_closed(&self) -> bool {
        self.cmd.is_closed()
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        let _ = self.cmd.send(Command::Destroy { reply: None });
    }
}

/// The session task: sole owner of the carrier and the channel table.
struct MuxTask<C: Carrier> {
    carrier: C,
    table: ChannelTable,
    commands: mpsc::UnboundedReceiver<Command>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    session: mpsc::UnboundedSender<SessionEvent>,
    keepalive: Keepalive,
    destroyed: bool,
}

impl<C: Carrier> MuxTask<C> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command).await {
                            break;
                        }
                    }
                    None => break,
                },
                event = self.carrier.recv() => match event {
                    Some(CarrierEvent::Message(bytes)) => {
                        if self.handle_message(bytes).await {
                            break;
                        }
                    }
                    Some(CarrierEvent::Pong) => self.keepalive.on_pong(),
                    Some(CarrierEvent::Closed) | None => {
                        debug!("carrier closed before destroy");
                        self.terminate(MuxError::SocketClosedUnexpectedly);
                        break;
                    }
                },
                _ = self.keepalive.tick() => {
                    if let Err(err) = self.carrier.ping().await {
                        warn!(%err, "carrier ping failed");
                    }
                    if self.keepalive.expired() {
                        let idle_ms = self.keepalive.idle().as_millis() as u64;
                        self.terminate(MuxError::PingTimeout { idle_ms });
                        break;
                    }
                }
            }
        }
    }

    /// Handle one API command. Returns `true` when the session is over.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Open { options, reply } => {
                let result = match options.dst_channel {
                    Some(peer) => self.open_accept(peer).await,
                    None => self.open_initiate(options.timeout).await,
                };
                let _ = reply.send(result);
            }
            Command::Close { id, reply } => {
                let result = self.close_channel(id).await;
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Command::Send {
                id,
                segments,
                reply,
            } => {
                let result = self.send_data(id, segments).await;
                match (result, reply) {
                    (result, Some(reply)) => {
                        let _ = reply.send(result);
                    }
                    (Err(err), None) => {
                        // Fire-and-forget failures surface on the channel.
                        if let Some(ctx) = self.table.get(id) {
                            let _ = ctx.events.send(ChannelEvent::Error(err));
                        }
                    }
                    (Ok(()), None) => {}
                }
            }
            Command::FlowControl { id, stop, reply } => {
                let result = self.send_flow_control(id, stop).await;
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Command::Info { id, reply } => {
                let info = self.table.get(id).map(|ctx| ChannelInfo {
                    bytes_written: ctx.counters.written(),
                    bytes_read: ctx.counters.read(),
                });
                let _ = reply.send(info);
            }
            Command::AckExpired { id } => {
                let opening = self.table.get(id).map(|ctx| !ctx.is_open()).unwrap_or(false);
                if opening {
                    debug!(channel = id, "open ack timed out");
                    self.teardown(id, Some(MuxError::OpenChannelTimeout));
                }
            }
            Command::Destroy { reply } => {
                self.destroy().await;
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
                return true;
            }
        }
        false
    }

    /// Initiate a channel open towards the peer.
    async fn open_initiate(&mut self, timeout: Duration) -> Result<Channel> {
        let id = allocate(&self.table)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(ChannelCounters::default());
        self.table
            .insert(id, ChannelContext::new(events_tx, counters.clone()));

        if let Err(err) = self.send_frame(MsgType::Open, CHANNEL_NONE, id, &[]).await {
            warn!(channel = id, %err, "open send failed");
            self.table.remove(id);
            return Err(MuxError::SocketClosed);
        }

        let cmd_tx = self.cmd_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = cmd_tx.send(Command::AckExpired { id });
        });
        if let Some(ctx) = self.table.get_mut(id) {
            ctx.ack_timer = Some(timer);
        }
        debug!(channel = id, "open initiated");

        Ok(Channel {
            id,
            events: events_rx,
            cmd: self.cmd_tx.clone(),
            counters,
        })
    }

    /// Accept a peer-announced channel and acknowledge it.
    async fn open_accept(&mut self, peer: u32) -> Result<Channel> {
        if self.table.remote_to_local(peer).is_some() {
            return Err(MuxError::OpenChannelReuse);
        }
        let id = allocate(&self.table)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(ChannelCounters::default());
        self.table
            .insert(id, ChannelContext::new(events_tx, counters.clone()));
        self.table.bind_remote(id, peer);

        if let Err(err) = self.send_frame(MsgType::Ack, peer, id, &[]).await {
            warn!(channel = id, %err, "ack send failed");
            self.teardown(id, Some(MuxError::SocketClosed));
            return Err(MuxError::SocketClosed);
        }
        debug!(channel = id, peer, "channel accepted");

        // Queued, never delivered synchronously: consumers observe Opened on
        // their next poll of the mailbox.
        if let Some(ctx) = self.table.get(id) {
            let _ = ctx.events.send(ChannelEvent::Opened { peer });
        }

        Ok(Channel {
            id,
            events: events_rx,
            cmd: self.cmd_tx.clone(),
            counters,
        })
    }

    /// Close an open channel and notify the peer.
    async fn close_channel(&mut self, id: u32) -> Result<()> {
        let peer = match self.table.get(id) {
            Some(ctx) if ctx.is_open() => ctx.dst_channel,
            _ => return Err(MuxError::ChannelNotOpen),
        };
        self.send_close(peer, id, None).await;
        self.teardown(id, None);
        Ok(())
    }

    /// Send DATA on an open channel, counting bytes only after the carrier
    /// accepts them.
    async fn send_data(&mut self, id: u32, segments: Vec<Bytes>) -> Result<()> {
        let peer = match self.table.get(id) {
            Some(ctx) if ctx.is_open() => ctx.dst_channel,
            _ => return Err(MuxError::ChannelNotOpen),
        };
        let total: u64 = segments.iter().map(|s| s.len() as u64).sum();
        if let Err(err) = self.send_frame(MsgType::Data, peer, id, &segments).await {
            warn!(channel = id, %err, "data send failed");
            return Err(MuxError::SocketClosed);
        }
        if let Some(ctx) = self.table.get(id) {
            ctx.counters.add_written(total);
        }
        Ok(())
    }

    /// Send PAUSE or RESUME for an open channel.
    async fn send_flow_control(&mut self, id: u32, stop: bool) -> Result<()> {
        let peer = match self.table.get(id) {
            Some(ctx) if ctx.is_open() => ctx.dst_channel,
            _ => return Err(MuxError::ChannelNotOpen),
        };
        let msg_type = if stop { MsgType::Pause } else { MsgType::Resume };
        if let Err(err) = self.send_frame(msg_type, peer, id, &[]).await {
            warn!(channel = id, %err, "flow control send failed");
            return Err(MuxError::SocketClosed);
        }
        Ok(())
    }

    /// Dispatch one inbound message. Returns `true` when the session is over.
    async fn handle_message(&mut self, bytes: Bytes) -> bool {
        let (header, payload) = match decode_frame(bytes) {
            Ok(decoded) => decoded,
            Err(err) => {
                debug!(%err, "dropping malformed frame");
                return false;
            }
        };

        if header.version != PROTOCOL_VERSION {
            warn!(version = header.version, "protocol version mismatch");
            self.terminate(MuxError::UnsupportedProtocolVersion {
                version: header.version,
            });
            return true;
        }

        match MsgType::from_u16(header.msg_type) {
            Some(MsgType::Data) => self.on_data(header, payload).await,
            Some(MsgType::Open) => self.on_open(header).await,
            Some(MsgType::Ack) => self.on_ack(header).await,
            Some(MsgType::Close) => self.on_close(header, payload),
            Some(MsgType::Pause) => self.on_flow_control(header, true).await,
            Some(MsgType::Resume) => self.on_flow_control(header, false).await,
            None => trace!(msg_type = header.msg_type, "ignoring unknown message type"),
        }
        false
    }

    async fn on_data(&mut self, header: FrameHeader, payload: Bytes) {
        let dst = header.dst_channel;
        let src = header.src_channel;
        let Some(peer) = self.table.get(dst).map(|ctx| ctx.dst_channel) else {
            self.close_reject(src, &MuxError::ChannelNotOpen).await;
            return;
        };
        if peer != src {
            self.mismatch(dst, src).await;
            return;
        }
        if let Some(ctx) = self.table.get(dst) {
            ctx.counters.add_read(payload.len() as u64);
            let _ = ctx.events.send(ChannelEvent::Data(payload));
        }
    }

    async fn on_open(&mut self, header: FrameHeader) {
        let peer = header.src_channel;
        if peer == CHANNEL_NONE {
            debug!("dropping OPEN without a source channel");
            return;
        }
        if let Some(existing) = self.table.remote_to_local(peer) {
            // Duplicate OPEN: the current holder goes down and the new
            // request is rejected, both with the reuse code.
            warn!(peer, channel = existing, "peer reopened a bound channel");
            self.send_close(peer, existing, Some(&MuxError::OpenChannelReuse))
                .await;
            self.teardown(existing, Some(MuxError::OpenChannelReuse));
            self.close_reject(peer, &MuxError::OpenChannelReuse).await;
            return;
        }
        match self.open_accept(peer).await {
            Ok(channel) => {
                let stream = MuxStream::from_channel(channel, StreamOptions::default());
                let _ = self.session.send(SessionEvent::Connection(stream));
            }
            Err(err) => {
                debug!(peer, %err, "rejecting inbound open");
                self.close_reject(peer, &err).await;
            }
        }
    }

    async fn on_ack(&mut self, header: FrameHeader) {
        let dst = header.dst_channel;
        let src = header.src_channel;
        let Some(peer) = self.table.get(dst).map(|ctx| ctx.dst_channel) else {
            self.close_reject(src, &MuxError::ChannelNotOpen).await;
            return;
        };
        if peer == src {
            debug!(channel = dst, "ignoring duplicate ack");
            return;
        }
        if peer != CHANNEL_NONE || self.table.remote_to_local(src).is_some() {
            // Ack for a channel bound elsewhere: the same bijectivity
            // violation a DATA mismatch reports.
            self.mismatch(dst, src).await;
            return;
        }
        if let Some(ctx) = self.table.get_mut(dst) {
            ctx.cancel_ack_timer();
        }
        self.table.bind_remote(dst, src);
        debug!(channel = dst, peer = src, "channel open");
        if let Some(ctx) = self.table.get(dst) {
            let _ = ctx.events.send(ChannelEvent::Opened { peer: src });
        }
    }

    fn on_close(&mut self, header: FrameHeader, payload: Bytes) {
        let remote_err = if payload.is_empty() {
            None
        } else {
            Some(match std::str::from_utf8(&payload) {
                Ok(code) => MuxError::from_code(code),
                Err(_) => MuxError::Remote(String::from_utf8_lossy(&payload).into_owned()),
            })
        };

        let Some(mut ctx) = self.table.remove(header.dst_channel) else {
            trace!(channel = header.dst_channel, "stray close");
            return;
        };
        let was_opening = ctx.ack_timer.is_some();
        ctx.cancel_ack_timer();

        let error = if was_opening {
            Some(MuxError::OpenChannelRejected {
                remote: remote_err.map(Box::new),
            })
        } else {
            remote_err.map(|remote| MuxError::ChannelClosedByPeer {
                remote: Some(Box::new(remote)),
            })
        };
        debug!(channel = header.dst_channel, ?error, "closed by peer");
        if let Some(err) = error {
            let _ = ctx.events.send(ChannelEvent::Error(err));
        }
        let _ = ctx.events.send(ChannelEvent::Closed);
    }

    async fn on_flow_control(&mut self, header: FrameHeader, pause: bool) {
        if !self.table.contains_local(header.dst_channel) {
            self.close_reject(header.src_channel, &MuxError::ChannelNotOpen)
                .await;
            return;
        }
        if let Some(ctx) = self.table.get(header.dst_channel) {
            let _ = ctx.events.send(ChannelEvent::FlowControl { pause });
        }
    }

    /// Close both channels involved in a source/destination mismatch.
    async fn mismatch(&mut self, dst: u32, src: u32) {
        warn!(channel = dst, peer_src = src, "channel mismatch");
        let other = self.table.remote_to_local(src);

        let peer_of_dst = self
            .table
            .get(dst)
            .map(|ctx| ctx.dst_channel)
            .unwrap_or(CHANNEL_NONE);
        if peer_of_dst != CHANNEL_NONE {
            self.send_close(peer_of_dst, dst, Some(&MuxError::ChannelMismatch))
                .await;
        }
        self.teardown(dst, Some(MuxError::ChannelMismatch));

        if let Some(other) = other {
            if other != dst && self.table.contains_local(other) {
                self.send_close(src, other, Some(&MuxError::ChannelMismatch))
                    .await;
                self.teardown(other, Some(MuxError::ChannelMismatch));
            }
        }
    }

    /// Remove a channel and deliver its final events.
    fn teardown(&mut self, id: u32, error: Option<MuxError>) {
        if let Some(mut ctx) = self.table.remove(id) {
            ctx.cancel_ack_timer();
            if let Some(err) = error {
                let _ = ctx.events.send(ChannelEvent::Error(err));
            }
            let _ = ctx.events.send(ChannelEvent::Closed);
        }
    }

    /// Fatal teardown: no frames leave the carrier past this point.
    fn terminate(&mut self, err: MuxError) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        warn!(%err, "session terminated");
        for (_, mut ctx) in self.table.drain() {
            ctx.cancel_ack_timer();
            let _ = ctx.events.send(ChannelEvent::Error(err.clone()));
            let _ = ctx.events.send(ChannelEvent::Closed);
        }
        let _ = self.session.send(SessionEvent::Error(err));
        let _ = self.session.send(SessionEvent::Closed);
    }

    /// Graceful teardown: open channels say goodbye to the peer.
    async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        debug!(channels = self.table.len(), "destroying session");
        for (id, mut ctx) in self.table.drain() {
            ctx.cancel_ack_timer();
            if ctx.is_open() {
                self.send_close(ctx.dst_channel, id, None).await;
            } else {
                let _ = ctx.events.send(ChannelEvent::Error(MuxError::SocketClosed));
            }
            let _ = ctx.events.send(ChannelEvent::Closed);
        }
        let _ = self.session.send(SessionEvent::Closed);
    }

    /// Send a CLOSE frame, optionally carrying an error code.
    async fn send_close(&mut self, dst: u32, src: u32, error: Option<&MuxError>) {
        let payload: Vec<Bytes> = error
            .map(|err| vec![Bytes::copy_from_slice(err.code().as_bytes())])
            .unwrap_or_default();
        if let Err(err) = self.send_frame(MsgType::Close, dst, src, &payload).await {
            warn!(dst, src, %err, "close send failed");
        }
    }

    /// Reject a peer channel: CLOSE with `src_channel = 0` and the code.
    async fn close_reject(&mut self, peer: u32, error: &MuxError) {
        self.send_close(peer, CHANNEL_NONE, Some(error)).await;
    }

    /// Write one message: header frame, then payload segments, with the
    /// end-of-message marker on the final frame.
    async fn send_frame(
        &mut self,
        msg_type: MsgType,
        dst: u32,
        src: u32,
        segments: &[Bytes],
    ) -> io::Result<()> {
        let total: usize = segments.iter().map(|s| s.len()).sum();
        let header = Bytes::copy_from_slice(&encode_header(msg_type, dst, src, total));
        let parts: Vec<&Bytes> = segments.iter().filter(|s| !s.is_empty()).collect();
        if parts.is_empty() {
            return self.carrier.send(header, true).await;
        }
        self.carrier.send(header, false).await?;
        let last = parts.len() - 1;
        for (i, segment) in parts.into_iter().enumerate() {
            self.carrier.send(segment.clone(), i == last).await?;
        }
        Ok(())
    }
}
