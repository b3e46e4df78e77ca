//! Agent event stream
//!
//! Typed events and the `data: ` frame decoder that produces them from a
//! chunked HTTP body.

mod decoder;
mod event;

#[cfg(test)]
mod proptests;

pub use decoder::{DecodeError, Frame, FrameDecoder, FrameStream};
pub use event::{EventKind, StreamingEvent};
