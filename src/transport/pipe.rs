//! A connected in-memory carrier pair.
//!
//! [`pipe`] returns two [`PipeCarrier`] halves wired back to back. Frames
//! sent on one half are reassembled into whole messages (respecting the
//! end-of-message marker) and delivered to the other. Pings are answered
//! with pongs automatically unless [`PipeCarrier::set_auto_pong`] disables
//! it — liveness tests need a peer that stays silent.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;

use super::carrier::{Carrier, CarrierEvent};

#[derive(Debug)]
enum PipeFrame {
    Frame { bytes: Bytes, fin: bool },
    Ping,
    Pong,
}

/// One half of an in-memory carrier pair.
#[derive(Debug)]
pub struct PipeCarrier {
    tx: mpsc::UnboundedSender<PipeFrame>,
    rx: mpsc::UnboundedReceiver<PipeFrame>,
    assembly: BytesMut,
    auto_pong: bool,
    closed: bool,
}

/// Create a connected pair of in-memory carriers.
pub fn pipe() -> (PipeCarrier, PipeCarrier) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        PipeCarrier::new(a_tx, a_rx),
        PipeCarrier::new(b_tx, b_rx),
    )
}

impl PipeCarrier {
    fn new(tx: mpsc::UnboundedSender<PipeFrame>, rx: mpsc::UnboundedReceiver<PipeFrame>) -> Self {
        Self {
            tx,
            rx,
            assembly: BytesMut::new(),
            auto_pong: true,
            closed: false,
        }
    }

    /// Control whether inbound pings are answered with pongs.
    pub fn set_auto_pong(&mut self, enabled: bool) {
        self.auto_pong = enabled;
    }

    fn push(&self, frame: PipeFrame) -> io::Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer carrier dropped"))
    }
}

impl Carrier for PipeCarrier {
    async fn send(&mut self, frame: Bytes, fin: bool) -> io::Result<()> {
        self.push(PipeFrame::Frame { bytes: frame, fin })
    }

    async fn ping(&mut self) -> io::Result<()> {
        self.push(PipeFrame::Ping)
    }

    async fn recv(&mut self) -> Option<CarrierEvent> {
        loop {
            match self.rx.recv().await {
                Some(PipeFrame::Frame { bytes, fin }) => {
                    self.assembly.put(bytes);
                    if fin {
                        return Some(CarrierEvent::Message(self.assembly.split().freeze()));
                    }
                }
                Some(PipeFrame::Ping) => {
                    if self.auto_pong {
                        let _ = self.push(PipeFrame::Pong);
                    }
                }
                Some(PipeFrame::Pong) => return Some(CarrierEvent::Pong),
                None => {
                    if self.closed {
                        return None;
                    }
                    self.closed = true;
                    return Some(CarrierEvent::Closed);
                }
            }
        }
    }
}
