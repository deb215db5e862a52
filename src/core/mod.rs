//! Core types shared by every layer: constants, the error taxonomy, and
//! result aliases.
//!
//! Everything here is plain data with no runtime dependencies; the
//! transport, multiplexer, and stream layers all build on it.

pub mod constants;
mod error;

pub use error::{ConfigError, MuxError, Result};
