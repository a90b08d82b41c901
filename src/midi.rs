//! MIDI output sink and message types
//!
//! Provides MIDI channel message encoding with 7-bit/14-bit clamping, and the
//! output sink scripts send through. The sink never fails on out-of-range
//! input; it clamps instead. Transport failures are reported to the caller and
//! the message is dropped.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::error::{BridgeError, Result};

pub const MIDI_MAX_7BIT: i64 = 127;
pub const MIDI_MAX_14BIT: i64 = 16383;

pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;
pub const CONTROL_CHANGE: u8 = 0xB0;
pub const PITCH_WHEEL: u8 = 0xE0;

/// Clamp a value into the 7-bit data byte range (0-127)
pub fn clamp_7bit(value: i64) -> u8 {
    value.clamp(0, MIDI_MAX_7BIT) as u8
}

/// Clamp a value into the 14-bit range (0-16383)
pub fn clamp_14bit(value: i64) -> u16 {
    value.clamp(0, MIDI_MAX_14BIT) as u16
}

/// Split a 14-bit value into (lsb, msb) data bytes
pub fn split_14bit(value: u16) -> (u8, u8) {
    ((value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8)
}

/// MIDI channel voice messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },

    /// Note On: channel (0-15), note (0-127), velocity (0-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },

    /// Control Change: channel (0-15), cc (0-127), value (0-127)
    ControlChange { channel: u8, cc: u8, value: u8 },

    /// Program Change: channel (0-15), program (0-127)
    ProgramChange { channel: u8, program: u8 },

    /// Channel Pressure: channel (0-15), pressure (0-127)
    ChannelPressure { channel: u8, pressure: u8 },

    /// Pitch Bend: channel (0-15), value (0-16383, 14-bit)
    PitchBend { channel: u8, value: u16 },
}

impl MidiMessage {
    /// Parse a channel message from raw bytes
    ///
    /// A Note On with velocity 0 stays a Note On.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let status = *data.first()?;
        if !(0x80..0xF0).contains(&status) {
            return None;
        }

        let channel = status & 0x0F;
        let byte = |i: usize| data.get(i).map(|b| b & 0x7F);

        match status & 0xF0 {
            0x80 => Some(MidiMessage::NoteOff {
                channel,
                note: byte(1)?,
                velocity: byte(2)?,
            }),
            0x90 => Some(MidiMessage::NoteOn {
                channel,
                note: byte(1)?,
                velocity: byte(2)?,
            }),
            0xB0 => Some(MidiMessage::ControlChange {
                channel,
                cc: byte(1)?,
                value: byte(2)?,
            }),
            0xC0 => Some(MidiMessage::ProgramChange {
                channel,
                program: byte(1)?,
            }),
            0xD0 => Some(MidiMessage::ChannelPressure {
                channel,
                pressure: byte(1)?,
            }),
            0xE0 => {
                let lsb = byte(1)? as u16;
                let msb = byte(2)? as u16;
                Some(MidiMessage::PitchBend {
                    channel,
                    value: (msb << 7) | lsb,
                })
            }
            _ => None,
        }
    }

    /// Encode the message to MIDI bytes
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                vec![NOTE_OFF | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                vec![NOTE_ON | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                vec![CONTROL_CHANGE | (channel & 0x0F), cc & 0x7F, value & 0x7F]
            }
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), program & 0x7F]
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                vec![0xD0 | (channel & 0x0F), pressure & 0x7F]
            }
            MidiMessage::PitchBend { channel, value } => {
                let (lsb, msb) = split_14bit(value & 0x3FFF);
                vec![PITCH_WHEEL | (channel & 0x0F), lsb, msb]
            }
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                write!(f, "NoteOff ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                write!(f, "NoteOn ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "ProgramChange ch:{} p:{}", channel + 1, program)
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                write!(f, "ChannelPressure ch:{} p:{}", channel + 1, pressure)
            }
            MidiMessage::PitchBend { channel, value } => {
                write!(f, "PitchBend ch:{} v:{}", channel + 1, value)
            }
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Raw byte transport underneath a [`MidiSink`]
pub trait MidiTransport: Send + Sync {
    /// Endpoint name, for logging
    fn name(&self) -> &str;

    /// Send one complete MIDI message
    fn send(&self, bytes: &[u8]) -> Result<()>;
}

/// midir-backed output endpoint
pub struct MidirTransport {
    name: String,
    connection: Mutex<midir::MidiOutputConnection>,
}

impl MidirTransport {
    /// Open an output endpoint
    ///
    /// Connects to the first output port whose name contains `port_pattern`
    /// (case-insensitive). On Unix, when no port matches, a virtual source
    /// named `port_pattern` is published instead so other applications can
    /// subscribe to the bridge.
    pub fn open(client_name: &str, port_pattern: &str) -> Result<Self> {
        let midi_out = midir::MidiOutput::new(client_name)
            .map_err(|e| BridgeError::transport("midi", e))?;

        if let Some((port, name)) = find_output_port(&midi_out, port_pattern) {
            let connection = midi_out
                .connect(&port, &format!("midihid-{}", name))
                .map_err(|e| BridgeError::transport("midi", e))?;
            info!("MIDI output connected: '{}'", name);
            return Ok(Self {
                name,
                connection: Mutex::new(connection),
            });
        }

        Self::open_virtual(midi_out, port_pattern)
    }

    #[cfg(unix)]
    fn open_virtual(midi_out: midir::MidiOutput, name: &str) -> Result<Self> {
        use midir::os::unix::VirtualOutput;

        let connection = midi_out
            .create_virtual(name)
            .map_err(|e| BridgeError::transport("midi", e))?;
        info!("MIDI virtual output created: '{}'", name);
        Ok(Self {
            name: name.to_string(),
            connection: Mutex::new(connection),
        })
    }

    #[cfg(not(unix))]
    fn open_virtual(_midi_out: midir::MidiOutput, name: &str) -> Result<Self> {
        Err(BridgeError::Transport {
            target: "midi",
            message: format!("output port '{}' not found", name),
        })
    }
}

impl MidiTransport for MidirTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, bytes: &[u8]) -> Result<()> {
        self.connection
            .lock()
            .send(bytes)
            .map_err(|e| BridgeError::transport("midi", e))
    }
}

/// Find an output port by substring match
fn find_output_port(
    midi_out: &midir::MidiOutput,
    pattern: &str,
) -> Option<(midir::MidiOutputPort, String)> {
    let pattern = pattern.to_lowercase();
    for port in midi_out.ports() {
        if let Ok(name) = midi_out.port_name(&port) {
            if name.to_lowercase().contains(&pattern) {
                debug!("Found port '{}' matching pattern '{}'", name, pattern);
                return Some((port, name));
            }
        }
    }
    None
}

/// List available MIDI output port names
pub fn list_output_ports() -> Result<Vec<String>> {
    let midi_out = midir::MidiOutput::new("MidiHID-Scanner")
        .map_err(|e| BridgeError::transport("midi", e))?;

    Ok(midi_out
        .ports()
        .iter()
        .filter_map(|port| midi_out.port_name(port).ok())
        .collect())
}

/// MIDI output sink with a configurable channel
///
/// All data bytes are clamped before transmission. The channel (0-15) is merged
/// into the low nibble of channel voice opcodes.
pub struct MidiSink {
    transport: Arc<dyn MidiTransport>,
    channel: AtomicU8,
}

impl MidiSink {
    pub fn new(transport: Arc<dyn MidiTransport>) -> Self {
        Self {
            transport,
            channel: AtomicU8::new(0),
        }
    }

    pub fn name(&self) -> &str {
        self.transport.name()
    }

    pub fn channel(&self) -> u8 {
        self.channel.load(Ordering::Relaxed)
    }

    /// Set the output channel (0-15); higher bits are discarded
    pub fn set_channel(&self, channel: u8) {
        self.channel.store(channel & 0x0F, Ordering::Relaxed);
    }

    fn status_byte(&self, opcode: u8) -> u8 {
        if (0x80..0xF0).contains(&opcode) {
            (opcode & 0xF0) | self.channel()
        } else {
            opcode
        }
    }

    fn transmit(&self, bytes: &[u8]) -> Result<()> {
        match MidiMessage::parse(bytes) {
            Some(msg) => trace!("MIDI -> {}: {}", self.name(), msg),
            None => trace!("MIDI -> {}: {}", self.name(), format_hex(bytes)),
        }
        self.transport.send(bytes)
    }

    /// Send a single status byte
    pub fn send_message(&self, opcode: u8) -> Result<()> {
        self.transmit(&[self.status_byte(opcode)])
    }

    /// Send a status byte with one data byte
    pub fn send_message_data(&self, opcode: u8, data: i64) -> Result<()> {
        self.transmit(&[self.status_byte(opcode), clamp_7bit(data)])
    }

    /// Send a status byte with two data bytes
    pub fn send_message_data2(&self, opcode: u8, data1: i64, data2: i64) -> Result<()> {
        self.transmit(&[self.status_byte(opcode), clamp_7bit(data1), clamp_7bit(data2)])
    }

    pub fn send_note_on(&self, key: i64, velocity: i64) -> Result<()> {
        self.send_message_data2(NOTE_ON, key, velocity)
    }

    pub fn send_note_off(&self, key: i64, velocity: i64) -> Result<()> {
        self.send_message_data2(NOTE_OFF, key, velocity)
    }

    pub fn send_control_change(&self, controller: i64, value: i64) -> Result<()> {
        self.send_message_data2(CONTROL_CHANGE, controller, value)
    }

    /// Send a pitch wheel change, clamped to 14 bits and split into lsb/msb
    pub fn send_pitch_wheel(&self, value: i64) -> Result<()> {
        let (lsb, msb) = split_14bit(clamp_14bit(value));
        self.transmit(&[self.status_byte(PITCH_WHEEL), lsb, msb])
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Transport that records every message, optionally failing
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<Vec<u8>>>,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl RecordingTransport {
        pub fn messages(&self) -> Vec<Vec<u8>> {
            self.sent.lock().clone()
        }
    }

    impl MidiTransport for RecordingTransport {
        fn name(&self) -> &str {
            "recording"
        }

        fn send(&self, bytes: &[u8]) -> Result<()> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(BridgeError::transport("midi", "endpoint gone"));
            }
            self.sent.lock().push(bytes.to_vec());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingTransport;
    use super::*;
    use proptest::prelude::*;

    fn sink() -> (Arc<RecordingTransport>, MidiSink) {
        let transport = Arc::new(RecordingTransport::default());
        let sink = MidiSink::new(transport.clone());
        (transport, sink)
    }

    #[test]
    fn test_pitch_wheel_clamps_to_14bit() {
        let (transport, sink) = sink();
        sink.send_pitch_wheel(20000).unwrap();
        assert_eq!(transport.messages(), vec![vec![0xE0, 0x7F, 0x7F]]);
    }

    #[test]
    fn test_pitch_wheel_center_and_negative() {
        let (transport, sink) = sink();
        sink.send_pitch_wheel(8192).unwrap();
        sink.send_pitch_wheel(-1).unwrap();
        assert_eq!(
            transport.messages(),
            vec![vec![0xE0, 0x00, 0x40], vec![0xE0, 0x00, 0x00]]
        );
    }

    #[test]
    fn test_note_on_clamps_key_and_velocity() {
        let (transport, sink) = sink();
        sink.send_note_on(200, -5).unwrap();
        assert_eq!(transport.messages(), vec![vec![0x90, 127, 0]]);
    }

    #[test]
    fn test_channel_merged_into_opcode() {
        let (transport, sink) = sink();
        sink.set_channel(9);
        sink.send_control_change(7, 100).unwrap();
        sink.send_note_off(60, 0).unwrap();
        assert_eq!(
            transport.messages(),
            vec![vec![0xB9, 7, 100], vec![0x89, 60, 0]]
        );
    }

    #[test]
    fn test_channel_masked_to_low_nibble() {
        let (_, sink) = sink();
        sink.set_channel(0x1F);
        assert_eq!(sink.channel(), 0x0F);
    }

    #[test]
    fn test_system_messages_keep_opcode() {
        let (transport, sink) = sink();
        sink.set_channel(3);
        sink.send_message(0xF8).unwrap();
        assert_eq!(transport.messages(), vec![vec![0xF8]]);
    }

    #[test]
    fn test_transport_failure_is_reported() {
        let (transport, sink) = sink();
        transport.fail.store(true, Ordering::Relaxed);
        let err = sink.send_note_on(60, 100).unwrap_err();
        assert!(matches!(err, BridgeError::Transport { target: "midi", .. }));
        assert!(transport.messages().is_empty());
    }

    #[test]
    fn test_parse_pitch_bend() {
        let msg = MidiMessage::parse(&[0xE0, 0x00, 0x40]).unwrap();
        assert_eq!(msg, MidiMessage::PitchBend { channel: 0, value: 8192 });
    }

    #[test]
    fn test_parse_rejects_system_and_short_messages() {
        assert_eq!(MidiMessage::parse(&[0xF8]), None);
        assert_eq!(MidiMessage::parse(&[0x90, 60]), None);
        assert_eq!(MidiMessage::parse(&[]), None);
    }

    #[test]
    fn test_display() {
        let msg = MidiMessage::NoteOn { channel: 0, note: 60, velocity: 100 };
        assert_eq!(msg.to_string(), "NoteOn ch:1 n:60 v:100");
        assert_eq!(format_hex(&msg.encode()), "90 3C 64");
    }

    proptest! {
        #[test]
        fn prop_data_bytes_always_7bit(key in any::<i64>(), value in any::<i64>()) {
            let (transport, sink) = sink();
            sink.send_control_change(key, value).unwrap();
            let sent = transport.messages();
            prop_assert!(sent[0][1] <= 127);
            prop_assert!(sent[0][2] <= 127);
        }

        #[test]
        fn prop_pitch_wheel_roundtrips_in_range(value in 0i64..=16383) {
            let (transport, sink) = sink();
            sink.send_pitch_wheel(value).unwrap();
            let sent = transport.messages();
            let parsed = MidiMessage::parse(&sent[0]).unwrap();
            prop_assert_eq!(parsed, MidiMessage::PitchBend { channel: 0, value: value as u16 });
        }
    }
}
