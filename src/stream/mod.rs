//! Stream layer: the duplex byte-stream façade over a channel.

mod adapter;

pub use adapter::{MuxStream, StreamOptions};
