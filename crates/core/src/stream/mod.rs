//! # Output Streams
//!
//! Turns raw subprocess output into line-oriented events.
//!
//! - `lines` - Chunk reassembly on carriage return / line feed boundaries
//! - `classify` - Progress-bar detection for in-place updates

pub mod classify;
pub mod lines;

pub use classify::is_progress;
pub use lines::{feed, LineBuffer, Utf8Decoder};
