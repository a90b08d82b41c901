//! OSC 1.0 message encoding
//!
//! Wire layout: padded address, padded `,`-prefixed type tag string, argument
//! data. Strings are null-terminated and padded to a 4-byte boundary, numbers
//! are big-endian, blobs carry a big-endian u32 length and padded payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::error::{BridgeError, Result};

/// A typed OSC argument
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    Str(String),
    Blob(Vec<u8>),
    /// Terminates an argument list passed to [`OscMessage::with_arguments`]
    End,
}

impl OscArg {
    pub fn tag(&self) -> Option<char> {
        match self {
            OscArg::Int(_) => Some('i'),
            OscArg::Float(_) => Some('f'),
            OscArg::Str(_) => Some('s'),
            OscArg::Blob(_) => Some('b'),
            OscArg::End => None,
        }
    }
}

impl fmt::Display for OscArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OscArg::Int(v) => write!(f, "i:{}", v),
            OscArg::Float(v) => write!(f, "f:{}", v),
            OscArg::Str(s) => write!(f, "s:{:?}", s),
            OscArg::Blob(b) => write!(f, "b:<{} bytes>", b.len()),
            OscArg::End => write!(f, "end"),
        }
    }
}

fn padding_for(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Append a null-terminated string padded to 4 bytes
///
/// OSC strings cannot hold NUL, so the string is cut at the first one.
fn put_padded_str(buf: &mut BytesMut, s: &str) {
    let bytes = s.as_bytes();
    let bytes = match bytes.iter().position(|&b| b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    };
    buf.put_slice(bytes);
    // at least one terminator, then pad
    let total = bytes.len() + 1;
    buf.put_bytes(0, 1 + padding_for(total));
}

fn put_padded_blob(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
    buf.put_bytes(0, padding_for(data.len()));
}

fn validate_address(address: &str) -> Result<()> {
    if address.starts_with('/') {
        Ok(())
    } else {
        Err(BridgeError::InvalidOscAddress(address.to_string()))
    }
}

/// Incremental OSC message builder
///
/// Each `append_*` pushes its type tag and its argument bytes together, so the
/// tag sequence and the data sequence can never drift apart.
#[derive(Debug, Clone)]
pub struct OscMessageBuilder {
    address: String,
    type_tags: String,
    arguments: BytesMut,
}

impl OscMessageBuilder {
    pub fn new(address: impl Into<String>) -> Result<Self> {
        let address = address.into();
        validate_address(&address)?;
        Ok(Self {
            address,
            type_tags: String::from(","),
            arguments: BytesMut::new(),
        })
    }

    pub fn append_int(&mut self, value: i32) -> &mut Self {
        self.type_tags.push('i');
        self.arguments.put_i32(value);
        self
    }

    pub fn append_float(&mut self, value: f32) -> &mut Self {
        self.type_tags.push('f');
        self.arguments.put_f32(value);
        self
    }

    pub fn append_string(&mut self, value: &str) -> &mut Self {
        self.type_tags.push('s');
        put_padded_str(&mut self.arguments, value);
        self
    }

    pub fn append_blob_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.type_tags.push('b');
        put_padded_blob(&mut self.arguments, data);
        self
    }

    /// Append any argument kind; `End` is ignored
    pub fn append(&mut self, arg: &OscArg) -> &mut Self {
        match arg {
            OscArg::Int(v) => self.append_int(*v),
            OscArg::Float(v) => self.append_float(*v),
            OscArg::Str(s) => self.append_string(s),
            OscArg::Blob(b) => self.append_blob_bytes(b),
            OscArg::End => self,
        }
    }

    /// Freeze into an immutable, encoded message
    pub fn build(self) -> OscMessage {
        let mut packet = BytesMut::with_capacity(
            self.address.len() + self.type_tags.len() + self.arguments.len() + 8,
        );
        put_padded_str(&mut packet, &self.address);
        put_padded_str(&mut packet, &self.type_tags);
        packet.put_slice(&self.arguments);

        OscMessage {
            address: self.address,
            type_tags: self.type_tags,
            packet: packet.freeze(),
        }
    }
}

/// An encoded OSC message, immutable once built
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    address: String,
    type_tags: String,
    packet: Bytes,
}

impl OscMessage {
    /// Build a message from a tagged argument list
    ///
    /// Arguments are taken until the first [`OscArg::End`] sentinel, or the
    /// end of the slice.
    pub fn with_arguments(address: impl Into<String>, args: &[OscArg]) -> Result<Self> {
        let mut builder = OscMessageBuilder::new(address)?;
        for arg in args.iter().take_while(|a| **a != OscArg::End) {
            builder.append(arg);
        }
        Ok(builder.build())
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Type tag string including the leading comma
    pub fn type_tags(&self) -> &str {
        &self.type_tags
    }

    /// Encoded wire bytes (always a multiple of 4 long)
    pub fn as_bytes(&self) -> &[u8] {
        &self.packet
    }

    pub fn len(&self) -> usize {
        self.packet.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packet.is_empty()
    }

    /// Decoded argument values
    pub fn args(&self) -> Vec<OscArg> {
        // The packet was produced by the builder, so it always decodes
        Self::decode_parts(&self.packet)
            .map(|(_, _, args)| args)
            .unwrap_or_default()
    }

    /// Decode a wire packet holding a single message with `i f s b` arguments
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (address, type_tags, args) = Self::decode_parts(data)?;
        let mut builder = OscMessageBuilder::new(address)?;
        for arg in &args {
            builder.append(arg);
        }
        let message = builder.build();
        debug_assert_eq!(message.type_tags, type_tags);
        Ok(message)
    }

    fn decode_parts(data: &[u8]) -> Result<(String, String, Vec<OscArg>)> {
        if data.len() % 4 != 0 {
            return Err(BridgeError::OscDecode(format!(
                "packet length {} is not a multiple of 4",
                data.len()
            )));
        }

        let mut buf = data;
        let address = read_padded_str(&mut buf)?;
        let type_tags = read_padded_str(&mut buf)?;
        if !type_tags.starts_with(',') {
            return Err(BridgeError::OscDecode(format!(
                "type tag string '{}' does not start with ','",
                type_tags
            )));
        }

        let mut args = Vec::with_capacity(type_tags.len() - 1);
        for tag in type_tags.chars().skip(1) {
            let arg = match tag {
                'i' => OscArg::Int(read_word(&mut buf)?.get_i32()),
                'f' => OscArg::Float(read_word(&mut buf)?.get_f32()),
                's' => OscArg::Str(read_padded_str(&mut buf)?),
                'b' => {
                    let len = read_word(&mut buf)?.get_u32() as usize;
                    let padded = len + padding_for(len);
                    if buf.len() < padded {
                        return Err(BridgeError::OscDecode("truncated blob".to_string()));
                    }
                    let blob = buf[..len].to_vec();
                    buf.advance(padded);
                    OscArg::Blob(blob)
                }
                other => {
                    return Err(BridgeError::OscDecode(format!(
                        "unsupported type tag '{}'",
                        other
                    )))
                }
            };
            args.push(arg);
        }

        if !buf.is_empty() {
            return Err(BridgeError::OscDecode(format!(
                "{} trailing bytes after arguments",
                buf.len()
            )));
        }

        Ok((address, type_tags, args))
    }
}

impl fmt::Display for OscMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.address, self.type_tags)?;
        for arg in self.args() {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn read_word<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    if buf.len() < 4 {
        return Err(BridgeError::OscDecode("truncated argument".to_string()));
    }
    let (word, rest) = buf.split_at(4);
    *buf = rest;
    Ok(word)
}

fn read_padded_str(buf: &mut &[u8]) -> Result<String> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| BridgeError::OscDecode("unterminated string".to_string()))?;
    let s = std::str::from_utf8(&buf[..end])
        .map_err(|e| BridgeError::OscDecode(e.to_string()))?
        .to_string();
    let consumed = end + 1 + padding_for(end + 1);
    if buf.len() < consumed {
        return Err(BridgeError::OscDecode("string padding truncated".to_string()));
    }
    *buf = &buf[consumed..];
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_reference_message() {
        let mut builder = OscMessageBuilder::new("/test").unwrap();
        builder.append_int(42).append_float(1.5).append_string("hi");
        let msg = builder.build();

        let expected: Vec<u8> = [
            b"/test\0\0\0".as_slice(),
            b",ifs\0\0\0\0",
            &42i32.to_be_bytes(),
            &1.5f32.to_be_bytes(),
            b"hi\0\0",
        ]
        .concat();

        assert_eq!(msg.as_bytes(), expected.as_slice());
        assert_eq!(msg.type_tags(), ",ifs");
        assert_eq!(msg.len() % 4, 0);
    }

    #[test]
    fn test_roundtrip_reference_message() {
        let msg = OscMessage::with_arguments(
            "/test",
            &[OscArg::Int(42), OscArg::Float(1.5), OscArg::Str("hi".to_string())],
        )
        .unwrap();

        let decoded = OscMessage::decode(msg.as_bytes()).unwrap();
        assert_eq!(decoded.address(), "/test");
        assert_eq!(decoded.type_tags(), ",ifs");
        assert_eq!(
            decoded.args(),
            vec![OscArg::Int(42), OscArg::Float(1.5), OscArg::Str("hi".to_string())]
        );
    }

    #[test]
    fn test_decodes_with_rosc() {
        let mut builder = OscMessageBuilder::new("/pad/1").unwrap();
        builder
            .append_int(-7)
            .append_float(0.25)
            .append_string("abcd")
            .append_blob_bytes(&[1, 2, 3]);
        let msg = builder.build();

        let (rest, packet) = rosc::decoder::decode_udp(msg.as_bytes()).unwrap();
        assert!(rest.is_empty());
        match packet {
            rosc::OscPacket::Message(m) => {
                assert_eq!(m.addr, "/pad/1");
                assert_eq!(
                    m.args,
                    vec![
                        rosc::OscType::Int(-7),
                        rosc::OscType::Float(0.25),
                        rosc::OscType::String("abcd".to_string()),
                        rosc::OscType::Blob(vec![1, 2, 3]),
                    ]
                );
            }
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_string_length_multiple_of_four_gets_full_pad() {
        let mut builder = OscMessageBuilder::new("/abc").unwrap();
        builder.append_string("wxyz");
        let msg = builder.build();
        // "/abc" needs 4 NULs, "wxyz" needs 4 NULs
        assert_eq!(&msg.as_bytes()[..8], b"/abc\0\0\0\0");
        assert_eq!(&msg.as_bytes()[12..], b"wxyz\0\0\0\0");
    }

    #[test]
    fn test_empty_argument_list() {
        let msg = OscMessage::with_arguments("/ping", &[]).unwrap();
        assert_eq!(msg.as_bytes(), b"/ping\0\0\0,\0\0\0");
        assert!(msg.args().is_empty());
    }

    #[test]
    fn test_sentinel_stops_argument_list() {
        let msg = OscMessage::with_arguments(
            "/x",
            &[OscArg::Int(1), OscArg::End, OscArg::Int(2)],
        )
        .unwrap();
        assert_eq!(msg.type_tags(), ",i");
        assert_eq!(msg.args(), vec![OscArg::Int(1)]);
    }

    #[test]
    fn test_blob_padding() {
        let mut builder = OscMessageBuilder::new("/b").unwrap();
        builder.append_blob_bytes(&[0xAA; 5]);
        let msg = builder.build();
        let args = &msg.as_bytes()[8..];
        assert_eq!(&args[..4], &5u32.to_be_bytes());
        assert_eq!(&args[4..9], &[0xAA; 5]);
        assert_eq!(&args[9..], &[0, 0, 0]);
    }

    #[test]
    fn test_string_cut_at_nul() {
        let mut builder = OscMessageBuilder::new("/s").unwrap();
        builder.append_string("ab\0cd");
        assert_eq!(builder.build().args(), vec![OscArg::Str("ab".to_string())]);
    }

    #[test]
    fn test_rejects_address_without_slash() {
        let err = OscMessageBuilder::new("test").unwrap_err();
        assert_eq!(err, BridgeError::InvalidOscAddress("test".to_string()));
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let packet = b"/x\0\0,d\0\0\0\0\0\0\0\0\0\0";
        assert!(matches!(
            OscMessage::decode(packet),
            Err(BridgeError::OscDecode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_packet() {
        let msg = OscMessage::with_arguments("/t", &[OscArg::Int(1)]).unwrap();
        let bytes = &msg.as_bytes()[..msg.len() - 4];
        assert!(OscMessage::decode(bytes).is_err());
    }

    #[test]
    fn test_display() {
        let msg = OscMessage::with_arguments("/d", &[OscArg::Int(3), OscArg::Str("x".into())])
            .unwrap();
        assert_eq!(msg.to_string(), "/d ,is i:3 s:\"x\"");
    }

    fn arg_strategy() -> impl Strategy<Value = OscArg> {
        prop_oneof![
            any::<i32>().prop_map(OscArg::Int),
            (-1.0e6f32..1.0e6).prop_map(OscArg::Float),
            "[a-zA-Z0-9 ]{0,12}".prop_map(OscArg::Str),
            proptest::collection::vec(any::<u8>(), 0..9).prop_map(OscArg::Blob),
        ]
    }

    proptest! {
        #[test]
        fn prop_encoded_length_is_word_aligned(
            address in "/[a-z]{0,10}",
            args in proptest::collection::vec(arg_strategy(), 0..6),
        ) {
            let msg = OscMessage::with_arguments(address.clone(), &args).unwrap();
            prop_assert_eq!(msg.len() % 4, 0);
            prop_assert_eq!(msg.type_tags().len(), args.len() + 1);

            let decoded = OscMessage::decode(msg.as_bytes()).unwrap();
            prop_assert_eq!(decoded.address(), address.as_str());
            prop_assert_eq!(decoded.args(), args);
        }
    }
}
