//! The channel table: local contexts and the remote id index.
//!
//! Two maps, kept bijective for open channels: `local` maps a local id to
//! its context, `remote` maps a peer id back to the local id. A context
//! with `dst_channel == 0` is still opening and has no `remote` entry; a
//! context with `dst_channel > 0` is open and `remote[dst_channel]` points
//! back at it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::constants::CHANNEL_NONE;
use crate::mux::channel::{ChannelCounters, ChannelEvent};

/// Per-channel state owned by the multiplexer task.
#[derive(Debug)]
pub(crate) struct ChannelContext {
    /// The peer's id for this channel; 0 until acknowledged.
    pub dst_channel: u32,
    /// The channel's event mailbox.
    pub events: mpsc::UnboundedSender<ChannelEvent>,
    /// Shared byte counters.
    pub counters: Arc<ChannelCounters>,
    /// Pending ack timer; present exactly while an initiated open awaits
    /// its ACK.
    pub ack_timer: Option<JoinHandle<()>>,
}

impl ChannelContext {
    pub(crate) fn new(
        events: mpsc::UnboundedSender<ChannelEvent>,
        counters: Arc<ChannelCounters>,
    ) -> Self {
        Self {
            dst_channel: CHANNEL_NONE,
            events,
            counters,
            ack_timer: None,
        }
    }

    /// Whether the channel has completed its handshake.
    pub(crate) fn is_open(&self) -> bool {
        self.dst_channel != CHANNEL_NONE
    }

    /// Abort and clear the ack timer, if armed.
    pub(crate) fn cancel_ack_timer(&mut self) {
        if let Some(timer) = self.ack_timer.take() {
            timer.abort();
        }
    }
}

/// The channel table.
#[derive(Debug)]
pub(crate) struct ChannelTable {
    local: HashMap<u32, ChannelContext>,
    remote: HashMap<u32, u32>,
    max_channels: usize,
}

impl ChannelTable {
    pub(crate) fn new(max_channels: usize) -> Self {
        Self {
            local: HashMap::new(),
            remote: HashMap::new(),
            max_channels,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.local.len()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.local.len() >= self.max_channels
    }

    pub(crate) fn max_channels(&self) -> usize {
        self.max_channels
    }

    /// The highest allocated local id, if any.
    pub(crate) fn max_id(&self) -> Option<u32> {
        self.local.keys().copied().max()
    }

    pub(crate) fn contains_local(&self, id: u32) -> bool {
        self.local.contains_key(&id)
    }

    pub(crate) fn get(&self, id: u32) -> Option<&ChannelContext> {
        self.local.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> Option<&mut ChannelContext> {
        self.local.get_mut(&id)
    }

    /// Install a context under `id`. The id must be fresh.
    pub(crate) fn insert(&mut self, id: u32, ctx: ChannelContext) {
        debug_assert!(!self.local.contains_key(&id));
        self.local.insert(id, ctx);
    }

    /// Bind `local` to the peer id `remote`, completing the handshake.
    pub(crate) fn bind_remote(&mut self, local: u32, remote: u32) {
        if let Some(ctx) = self.local.get_mut(&local) {
            ctx.dst_channel = remote;
            self.remote.insert(remote, local);
        }
    }

    /// The local id bound to a peer id, if any.
    pub(crate) fn remote_to_local(&self, remote: u32) -> Option<u32> {
        self.remote.get(&remote).copied()
    }

    /// Remove a context, unbinding its remote entry when open.
    pub(crate) fn remove(&mut self, id: u32) -> Option<ChannelContext> {
        let ctx = self.local.remove(&id)?;
        if ctx.dst_channel != CHANNEL_NONE {
            self.remote.remove(&ctx.dst_channel);
        }
        Some(ctx)
    }

    /// Remove every context, for session teardown.
    pub(crate) fn drain(&mut self) -> Vec<(u32, ChannelContext)> {
        self.remote.clear();
        self.local.drain().collect()
    }

    /// All allocated local ids.
    #[cfg(test)]
    pub(crate) fn local_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.local.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
