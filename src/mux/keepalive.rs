//! Liveness supervision state.
//!
//! The multiplexer pings the carrier on a fixed cadence and tracks when the
//! last pong arrived. When the pong silence reaches the alive threshold the
//! session is terminated with `PingTimeout`. This module owns the cadence
//! and the bookkeeping; the multiplexer task performs the actual ping and
//! termination.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Ping cadence and pong-idle tracking.
#[derive(Debug)]
pub(crate) struct Keepalive {
    interval: Interval,
    last_pong: Instant,
    threshold: Duration,
}

impl Keepalive {
    /// Start supervision: the first tick fires one `period` from now, and
    /// the peer is considered live as of now.
    pub(crate) fn new(period: Duration, threshold: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            last_pong: Instant::now(),
            threshold,
        }
    }

    /// Wait for the next ping tick. Cancel-safe.
    pub(crate) async fn tick(&mut self) {
        self.interval.tick().await;
    }

    /// Record a pong from the peer.
    pub(crate) fn on_pong(&mut self) {
        self.last_pong = Instant::now();
    }

    /// Time since the last pong.
    pub(crate) fn idle(&self) -> Duration {
        self.last_pong.elapsed()
    }

    /// Whether the pong silence has reached the alive threshold.
    pub(crate) fn expired(&self) -> bool {
        self.idle() >= self.threshold
    }
}
