//! Receive buffers, pack parser contract, and stock framing for strand.
//!
//! This crate holds the byte-level pieces of a strand session that know nothing
//! about sockets or timers: the cursor-based receive buffer the session reads
//! into, and the contract a caller implements to split that buffer into frames.
//!
//! ## Features
//!
//! - **Frame Buffer**: growable storage with a read cursor, compacted in place
//!   instead of reallocated once the consumed prefix is large enough
//! - **Pack Parser Contract**: `Incomplete` / `Corrupt` / `Complete` outcomes
//!   consulted after every read
//! - **Stock Parsers**: big-endian `u32` length prefix and single-digit prefix
//!
//! ## Buffer Layout
//!
//! ```text
//! 0            cursor              cursor+len            capacity
//! +--------------+---------------------+---------------------+
//! | consumed     | valid (unconsumed)  | writable            |
//! +--------------+---------------------+---------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod error;
pub mod parser;

// Re-export main types
pub use buffer::{FrameBuffer, RecvBuffer, DEFAULT_QUANTUM};
pub use error::WireError;
pub use parser::{
    DigitPrefixed, LengthPrefixed, PackParser, Packet, ParseOutcome, DEFAULT_MAX_FRAME_SIZE,
    HARD_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE,
};
