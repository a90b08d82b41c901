//! UDP sender for encoded OSC messages
//!
//! Best-effort delivery: no acknowledgment, no retry. Destination changes are
//! picked up by the next send.

use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::OscMessage;
use crate::error::{BridgeError, Result};

/// Upper bound on a single blocking send
const SEND_TIMEOUT: Duration = Duration::from_millis(50);

struct Destination {
    address: String,
    port: u16,
    /// Outcome of the last lookup, failures included; cleared when address or
    /// port change
    resolved: Option<Result<SocketAddr>>,
}

impl Destination {
    fn lookup(&self) -> Result<SocketAddr> {
        if self.port == 0 {
            return Err(BridgeError::transport("osc", "destination port is not set"));
        }
        if let Ok(ip) = self.address.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }

        (self.address.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| {
                BridgeError::transport("osc", format!("cannot resolve '{}': {}", self.address, e))
            })?
            // the socket is bound on IPv4
            .find(|a| a.is_ipv4())
            .ok_or_else(|| {
                BridgeError::transport("osc", format!("no IPv4 address for '{}'", self.address))
            })
    }
}

/// OSC output sink
pub struct OscSink {
    socket: UdpSocket,
    destination: Mutex<Destination>,
}

impl OscSink {
    /// Create a sink bound to an ephemeral local port
    pub fn new(address: impl Into<String>, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| BridgeError::transport("osc", e))?;
        socket
            .set_write_timeout(Some(SEND_TIMEOUT))
            .map_err(|e| BridgeError::transport("osc", e))?;
        // Allows destinations such as 255.255.255.255
        socket
            .set_broadcast(true)
            .map_err(|e| BridgeError::transport("osc", e))?;

        Ok(Self {
            socket,
            destination: Mutex::new(Destination {
                address: address.into(),
                port,
                resolved: None,
            }),
        })
    }

    pub fn set_destination_address(&self, address: impl Into<String>) {
        let mut dest = self.destination.lock();
        dest.address = address.into();
        dest.resolved = None;
    }

    pub fn destination_port(&self) -> u16 {
        self.destination.lock().port
    }

    pub fn set_destination_port(&self, port: u16) {
        let mut dest = self.destination.lock();
        dest.port = port;
        dest.resolved = None;
    }

    /// Resolve the destination once per address/port change
    ///
    /// A failed lookup is kept as well, so an unresolvable host costs one
    /// lookup rather than one per message.
    fn resolve(&self) -> Result<SocketAddr> {
        let mut dest = self.destination.lock();
        if let Some(resolved) = &dest.resolved {
            return resolved.clone();
        }

        let resolved = dest.lookup();
        match &resolved {
            Ok(addr) => debug!("OSC destination resolved: {}:{} -> {}", dest.address, dest.port, addr),
            Err(e) => warn!("OSC destination {}:{} unusable: {}", dest.address, dest.port, e),
        }
        dest.resolved = Some(resolved.clone());
        resolved
    }

    /// Send one message to the current destination
    pub fn send_message(&self, message: &OscMessage) -> Result<()> {
        let addr = self.resolve()?;
        trace!("OSC -> {}: {}", addr, message);
        self.socket
            .send_to(message.as_bytes(), addr)
            .map_err(|e| BridgeError::transport("osc", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc::{OscArg, OscMessageBuilder};

    fn receiver() -> (UdpSocket, u16) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, port)
    }

    #[test]
    fn test_send_message_over_udp() {
        let (rx, port) = receiver();
        let sink = OscSink::new("127.0.0.1", port).unwrap();

        let mut builder = OscMessageBuilder::new("/fader/1").unwrap();
        builder.append_float(0.5);
        let msg = builder.build();
        sink.send_message(&msg).unwrap();

        let mut buf = [0u8; 512];
        let (len, _) = rx.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], msg.as_bytes());
    }

    #[test]
    fn test_destination_change_applies_to_next_send() {
        let (rx_a, port_a) = receiver();
        let (rx_b, port_b) = receiver();
        let sink = OscSink::new("127.0.0.1", port_a).unwrap();
        let msg = OscMessage::with_arguments("/x", &[OscArg::Int(1)]).unwrap();

        sink.send_message(&msg).unwrap();
        let mut buf = [0u8; 64];
        assert!(rx_a.recv_from(&mut buf).is_ok());

        sink.set_destination_port(port_b);
        assert_eq!(sink.destination_port(), port_b);
        sink.send_message(&msg).unwrap();
        let (len, _) = rx_b.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], msg.as_bytes());
    }

    #[test]
    fn test_unresolvable_destination_is_transport_error() {
        let sink = OscSink::new("host.invalid", 9000).unwrap();
        let msg = OscMessage::with_arguments("/x", &[]).unwrap();
        let err = sink.send_message(&msg).unwrap_err();
        assert!(matches!(err, BridgeError::Transport { target: "osc", .. }));
    }

    #[test]
    fn test_failed_lookup_is_cached_until_destination_changes() {
        let (rx, port) = receiver();
        let sink = OscSink::new("host.invalid", port).unwrap();
        let msg = OscMessage::with_arguments("/x", &[OscArg::Int(3)]).unwrap();

        let first = sink.send_message(&msg).unwrap_err();
        assert!(matches!(sink.destination.lock().resolved, Some(Err(_))));
        assert_eq!(sink.send_message(&msg).unwrap_err(), first);

        sink.set_destination_address("127.0.0.1");
        assert!(sink.destination.lock().resolved.is_none());
        sink.send_message(&msg).unwrap();
        let mut buf = [0u8; 64];
        let (len, _) = rx.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], msg.as_bytes());
    }

    #[test]
    fn test_ip_literal_skips_lookup() {
        let sink = OscSink::new("10.0.0.7", 9000).unwrap();
        assert_eq!(sink.resolve().unwrap(), "10.0.0.7:9000".parse().unwrap());
    }

    #[test]
    fn test_zero_port_is_transport_error() {
        let sink = OscSink::new("127.0.0.1", 0).unwrap();
        let msg = OscMessage::with_arguments("/x", &[]).unwrap();
        assert!(sink.send_message(&msg).is_err());
    }
}
