//! MidiHID gateway
//!
//! Bridges HID controllers to MIDI and OSC output through a user script.

pub mod bridge;
pub mod config;
pub mod device;
pub mod error;
pub mod midi;
pub mod osc;
pub mod ports;
pub mod script;

pub use bridge::{BridgeController, BridgeOptions, BridgeStatus};
pub use error::{BridgeError, Result};
