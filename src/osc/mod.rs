//! Open Sound Control output
//!
//! [`OscMessageBuilder`] produces OSC 1.0 messages, [`OscSink`] sends them over UDP.

mod message;
mod sink;

pub use message::{OscArg, OscMessage, OscMessageBuilder};
pub use sink::OscSink;
