//! Request packets sent to the module.
//!
//! Each request renders to an [`ApiFrame`] with a frame ID of 0. The
//! correlator stamps a real frame ID when the request expects a response.

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::{ApiFrame, ApiFrameType, AtCommand};
use crate::types::{IpProtocol, XBee16BitAddress, XBee64BitAddress};

/// Transmit option: do not request a MAC acknowledgment.
pub const TRANSMIT_OPTION_DISABLE_ACK: u8 = 0x01;

/// Remote AT option: apply changes immediately.
pub const REMOTE_AT_APPLY_CHANGES: u8 = 0x02;

/// Broadcast radius meaning "network maximum hops".
pub const MAX_BROADCAST_RADIUS: u8 = 0;

/// IPv4 transmit option: close the socket after sending.
pub const IP_OPTION_CLOSE_SOCKET: u8 = 0x02;

/// Local AT command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtCommandRequest {
    /// Command name.
    pub command: AtCommand,
    /// Parameter value; empty for a query.
    pub parameter: Bytes,
    /// Queue the change until `AC` instead of applying it.
    pub queued: bool,
}

impl AtCommandRequest {
    /// Creates a query (no parameter).
    #[must_use]
    pub fn new(command: AtCommand) -> Self {
        Self {
            command,
            parameter: Bytes::new(),
            queued: false,
        }
    }

    /// Creates a command carrying a parameter value.
    #[must_use]
    pub fn with_parameter(command: AtCommand, parameter: impl Into<Bytes>) -> Self {
        Self {
            command,
            parameter: parameter.into(),
            queued: false,
        }
    }

    /// Marks the command as queued.
    #[must_use]
    pub const fn queued(mut self) -> Self {
        self.queued = true;
        self
    }

    /// Renders the request as a frame.
    #[must_use]
    pub fn to_frame(&self) -> ApiFrame {
        let frame_type = if self.queued {
            ApiFrameType::AtCommandQueue
        } else {
            ApiFrameType::AtCommand
        };
        let mut buf = BytesMut::with_capacity(3 + self.parameter.len());
        buf.put_u8(0);
        buf.put_slice(self.command.as_bytes());
        buf.put_slice(&self.parameter);
        ApiFrame::new(frame_type, buf.freeze())
    }
}

/// AT command executed on a remote node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAtCommandRequest {
    /// Destination 64-bit address.
    pub destination_64: XBee64BitAddress,
    /// Destination 16-bit address, `UNKNOWN` if not known.
    pub destination_16: XBee16BitAddress,
    /// Command name.
    pub command: AtCommand,
    /// Parameter value; empty for a query.
    pub parameter: Bytes,
    /// Apply the change immediately on the remote node.
    pub apply_changes: bool,
}

impl RemoteAtCommandRequest {
    /// Renders the request as a frame.
    #[must_use]
    pub fn to_frame(&self) -> ApiFrame {
        let mut buf = BytesMut::with_capacity(14 + self.parameter.len());
        buf.put_u8(0);
        buf.put_slice(&self.destination_64.to_bytes());
        buf.put_slice(&self.destination_16.to_bytes());
        buf.put_u8(if self.apply_changes {
            REMOTE_AT_APPLY_CHANGES
        } else {
            0
        });
        buf.put_slice(self.command.as_bytes());
        buf.put_slice(&self.parameter);
        ApiFrame::new(ApiFrameType::RemoteAtCommand, buf.freeze())
    }
}

/// Transmit request for ZigBee, DigiMesh and Point-to-Multipoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitRequest {
    /// Destination 64-bit address.
    pub destination_64: XBee64BitAddress,
    /// Destination 16-bit address, `UNKNOWN` if not known.
    pub destination_16: XBee16BitAddress,
    /// Maximum hops for broadcasts.
    pub broadcast_radius: u8,
    /// Transmit options.
    pub options: u8,
    /// Application data.
    pub data: Bytes,
}

impl TransmitRequest {
    /// Creates a unicast request to a 64-bit address.
    #[must_use]
    pub fn new(destination_64: XBee64BitAddress, data: impl Into<Bytes>) -> Self {
        Self {
            destination_64,
            destination_16: XBee16BitAddress::UNKNOWN,
            broadcast_radius: MAX_BROADCAST_RADIUS,
            options: 0,
            data: data.into(),
        }
    }

    /// Renders the request as a frame.
    #[must_use]
    pub fn to_frame(&self) -> ApiFrame {
        let mut buf = BytesMut::with_capacity(13 + self.data.len());
        buf.put_u8(0);
        buf.put_slice(&self.destination_64.to_bytes());
        buf.put_slice(&self.destination_16.to_bytes());
        buf.put_u8(self.broadcast_radius);
        buf.put_u8(self.options);
        buf.put_slice(&self.data);
        ApiFrame::new(ApiFrameType::TransmitRequest, buf.freeze())
    }
}

/// 802.15.4 transmit request to a 64-bit address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tx64Request {
    /// Destination address.
    pub destination: XBee64BitAddress,
    /// Transmit options.
    pub options: u8,
    /// Application data.
    pub data: Bytes,
}

impl Tx64Request {
    /// Renders the request as a frame.
    #[must_use]
    pub fn to_frame(&self) -> ApiFrame {
        let mut buf = BytesMut::with_capacity(10 + self.data.len());
        buf.put_u8(0);
        buf.put_slice(&self.destination.to_bytes());
        buf.put_u8(self.options);
        buf.put_slice(&self.data);
        ApiFrame::new(ApiFrameType::Tx64Request, buf.freeze())
    }
}

/// 802.15.4 transmit request to a 16-bit address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tx16Request {
    /// Destination address.
    pub destination: XBee16BitAddress,
    /// Transmit options.
    pub options: u8,
    /// Application data.
    pub data: Bytes,
}

impl Tx16Request {
    /// Renders the request as a frame.
    #[must_use]
    pub fn to_frame(&self) -> ApiFrame {
        let mut buf = BytesMut::with_capacity(4 + self.data.len());
        buf.put_u8(0);
        buf.put_slice(&self.destination.to_bytes());
        buf.put_u8(self.options);
        buf.put_slice(&self.data);
        ApiFrame::new(ApiFrameType::Tx16Request, buf.freeze())
    }
}

/// IPv4 transmit request for Wi-Fi and cellular modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIpv4Request {
    /// Destination address.
    pub destination: Ipv4Addr,
    /// Destination port.
    pub destination_port: u16,
    /// Source port, 0 to let the module choose.
    pub source_port: u16,
    /// Transport protocol.
    pub protocol: IpProtocol,
    /// Close the socket once the data is sent.
    pub close_socket: bool,
    /// Application data.
    pub data: Bytes,
}

impl TxIpv4Request {
    /// Renders the request as a frame.
    #[must_use]
    pub fn to_frame(&self) -> ApiFrame {
        let mut buf = BytesMut::with_capacity(11 + self.data.len());
        buf.put_u8(0);
        buf.put_slice(&self.destination.octets());
        buf.put_u16(self.destination_port);
        buf.put_u16(self.source_port);
        buf.put_u8(self.protocol.to_byte());
        buf.put_u8(if self.close_socket {
            IP_OPTION_CLOSE_SOCKET
        } else {
            0
        });
        buf.put_slice(&self.data);
        ApiFrame::new(ApiFrameType::TxIpv4, buf.freeze())
    }
}
