//! # Audio Hand-off
//!
//! Frames received on `/audio-stream` are acknowledged by the socket actor and
//! then handed to an [`AudioSink`]. This is where a speech-to-text backend
//! gets plugged in; the gateway itself does not decode, buffer or forward
//! audio. The default sink discards everything.

pub mod sink;

pub use sink::{AudioSink, DiscardSink};
