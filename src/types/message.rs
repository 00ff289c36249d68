//! Received message types.

use std::net::Ipv4Addr;

use bytes::Bytes;

use crate::types::address::{XBee16BitAddress, XBee64BitAddress};

/// Receive option bit set when the packet was a broadcast.
pub const RECEIVE_OPTION_BROADCAST: u8 = 0x02;

/// Data received from a remote node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XBeeMessage {
    /// Source 64-bit address, `UNKNOWN` for 16-bit-only frames.
    pub source_64: XBee64BitAddress,
    /// Source 16-bit address, `UNKNOWN` if not reported.
    pub source_16: XBee16BitAddress,
    /// Receive options.
    pub options: u8,
    /// Signal strength in -dBm, reported by 802.15.4 frames only.
    pub rssi: Option<u8>,
    /// Application data.
    pub data: Bytes,
}

impl XBeeMessage {
    /// Returns true if the packet was sent as a broadcast.
    #[must_use]
    pub const fn is_broadcast(&self) -> bool {
        self.options & RECEIVE_OPTION_BROADCAST != 0
    }
}

/// Data received with explicit addressing (endpoints, cluster, profile).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitMessage {
    /// Plain message fields.
    pub message: XBeeMessage,
    /// Source endpoint.
    pub source_endpoint: u8,
    /// Destination endpoint.
    pub destination_endpoint: u8,
    /// Cluster ID.
    pub cluster_id: u16,
    /// Profile ID.
    pub profile_id: u16,
}

/// Transport protocol of IP frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpProtocol {
    /// UDP.
    Udp,
    /// TCP.
    Tcp,
    /// TCP over TLS.
    TcpSsl,
    /// Any other protocol byte.
    Unknown(u8),
}

impl IpProtocol {
    /// Parses a protocol byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Self::Udp,
            1 => Self::Tcp,
            4 => Self::TcpSsl,
            _ => Self::Unknown(byte),
        }
    }

    /// Returns the protocol byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Udp => 0,
            Self::Tcp => 1,
            Self::TcpSsl => 4,
            Self::Unknown(b) => b,
        }
    }
}

/// Data received over IP by Wi-Fi and cellular modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpMessage {
    /// Source IPv4 address.
    pub source: Ipv4Addr,
    /// Local port the data arrived on.
    pub destination_port: u16,
    /// Remote port the data came from.
    pub source_port: u16,
    /// Transport protocol.
    pub protocol: IpProtocol,
    /// Application data.
    pub data: Bytes,
}

/// IO sample reported by a remote node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoSample {
    /// Source 64-bit address.
    pub source_64: XBee64BitAddress,
    /// Source 16-bit address.
    pub source_16: XBee16BitAddress,
    /// Raw sample payload.
    pub payload: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_flag() {
        let msg = XBeeMessage {
            source_64: XBee64BitAddress::new(1),
            source_16: XBee16BitAddress::UNKNOWN,
            options: 0x42,
            rssi: None,
            data: Bytes::from_static(b"hi"),
        };
        assert!(msg.is_broadcast());
    }

    #[test]
    fn test_ip_protocol_roundtrip() {
        for byte in [0, 1, 4, 9] {
            assert_eq!(IpProtocol::from_byte(byte).to_byte(), byte);
        }
    }
}
