//! Binary parsing of frames received from the module.
//!
//! Every parser takes the frame payload that follows the frame type byte.

use std::net::Ipv4Addr;

use bytes::{Buf, Bytes};

use crate::error::{Error, Result};
use crate::protocol::{AtCommand, AtCommandStatus, DeliveryStatus, ModemStatus};
use crate::types::{
    ExplicitMessage, IoSample, IpMessage, IpProtocol, NodeRole, RemoteXBeeDevice,
    XBee16BitAddress, XBee64BitAddress, XBeeMessage, XBeeProtocol,
};

/// Response to a local AT command (`0x88`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtCommandResponse {
    /// Frame ID of the request.
    pub frame_id: u8,
    /// Command name echoed back.
    pub command: AtCommand,
    /// Command status.
    pub status: AtCommandStatus,
    /// Returned value, empty for set commands.
    pub value: Bytes,
}

/// Response to a remote AT command (`0x97`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAtCommandResponse {
    /// Frame ID of the request.
    pub frame_id: u8,
    /// Responding node 64-bit address.
    pub source_64: XBee64BitAddress,
    /// Responding node 16-bit address.
    pub source_16: XBee16BitAddress,
    /// Command name echoed back.
    pub command: AtCommand,
    /// Command status.
    pub status: AtCommandStatus,
    /// Returned value.
    pub value: Bytes,
}

/// Transmit status (`0x8B`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitStatus {
    /// Frame ID of the request.
    pub frame_id: u8,
    /// 16-bit address the packet was delivered to.
    pub destination_16: XBee16BitAddress,
    /// Number of application retries.
    pub retry_count: u8,
    /// Delivery outcome.
    pub delivery_status: DeliveryStatus,
    /// Route discovery overhead.
    pub discovery_status: u8,
}

/// 802.15.4 transmit status (`0x89`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxStatus {
    /// Frame ID of the request.
    pub frame_id: u8,
    /// Delivery outcome.
    pub delivery_status: DeliveryStatus,
}

fn too_short(what: &str, len: usize) -> Error {
    Error::Protocol {
        message: format!("{what} too short: {len} bytes"),
    }
}

fn get_address_64(cursor: &mut impl Buf) -> XBee64BitAddress {
    XBee64BitAddress::new(cursor.get_u64())
}

fn get_address_16(cursor: &mut impl Buf) -> XBee16BitAddress {
    XBee16BitAddress::new(cursor.get_u16())
}

fn get_command(cursor: &mut impl Buf) -> AtCommand {
    AtCommand::from_bytes([cursor.get_u8(), cursor.get_u8()])
}

/// Parses a null-terminated or unterminated string.
///
/// Returns the string and the number of bytes consumed, terminator included.
pub fn parse_string(data: &[u8]) -> (String, usize) {
    match data.iter().position(|&b| b == 0) {
        Some(end) => (String::from_utf8_lossy(&data[..end]).into_owned(), end + 1),
        None => (String::from_utf8_lossy(data).into_owned(), data.len()),
    }
}

/// Interprets an AT value as a big-endian unsigned integer.
///
/// # Errors
///
/// Returns an error if the value is empty or longer than 8 bytes.
pub fn parse_integer(value: &[u8]) -> Result<u64> {
    if value.is_empty() || value.len() > 8 {
        return Err(Error::Protocol {
            message: format!("cannot read a {}-byte value as an integer", value.len()),
        });
    }
    Ok(value
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

/// Parses a local AT command response.
///
/// Format:
/// ```text
/// [frame_id:1] [command:2] [status:1] [value:...]
/// ```
pub fn parse_at_command_response(data: &[u8]) -> Result<AtCommandResponse> {
    if data.len() < 4 {
        return Err(too_short("AT command response", data.len()));
    }

    let mut cursor = std::io::Cursor::new(data);
    let frame_id = cursor.get_u8();
    let command = get_command(&mut cursor);
    let status = AtCommandStatus::from_byte(cursor.get_u8());

    Ok(AtCommandResponse {
        frame_id,
        command,
        status,
        value: Bytes::copy_from_slice(&data[4..]),
    })
}

/// Parses a remote AT command response.
///
/// Format:
/// ```text
/// [frame_id:1] [source_64:8] [source_16:2] [command:2] [status:1] [value:...]
/// ```
pub fn parse_remote_at_command_response(data: &[u8]) -> Result<RemoteAtCommandResponse> {
    if data.len() < 14 {
        return Err(too_short("remote AT command response", data.len()));
    }

    let mut cursor = std::io::Cursor::new(data);
    let frame_id = cursor.get_u8();
    let source_64 = get_address_64(&mut cursor);
    let source_16 = get_address_16(&mut cursor);
    let command = get_command(&mut cursor);
    let status = AtCommandStatus::from_byte(cursor.get_u8());

    Ok(RemoteAtCommandResponse {
        frame_id,
        source_64,
        source_16,
        command,
        status,
        value: Bytes::copy_from_slice(&data[14..]),
    })
}

/// Parses a transmit status.
///
/// Format:
/// ```text
/// [frame_id:1] [destination_16:2] [retries:1] [delivery:1] [discovery:1]
/// ```
pub fn parse_transmit_status(data: &[u8]) -> Result<TransmitStatus> {
    if data.len() < 6 {
        return Err(too_short("transmit status", data.len()));
    }

    let mut cursor = std::io::Cursor::new(data);
    Ok(TransmitStatus {
        frame_id: cursor.get_u8(),
        destination_16: get_address_16(&mut cursor),
        retry_count: cursor.get_u8(),
        delivery_status: DeliveryStatus::from_byte(cursor.get_u8()),
        discovery_status: cursor.get_u8(),
    })
}

/// Parses an 802.15.4 transmit status: `[frame_id:1] [status:1]`.
pub fn parse_tx_status(data: &[u8]) -> Result<TxStatus> {
    if data.len() < 2 {
        return Err(too_short("TX status", data.len()));
    }
    Ok(TxStatus {
        frame_id: data[0],
        delivery_status: DeliveryStatus::from_byte(data[1]),
    })
}

/// Parses a modem status: `[status:1]`.
pub fn parse_modem_status(data: &[u8]) -> Result<ModemStatus> {
    data.first()
        .map(|&b| ModemStatus::from_byte(b))
        .ok_or_else(|| too_short("modem status", 0))
}

/// Parses a receive packet.
///
/// Format:
/// ```text
/// [source_64:8] [source_16:2] [options:1] [data:...]
/// ```
pub fn parse_receive_packet(data: &[u8]) -> Result<XBeeMessage> {
    if data.len() < 11 {
        return Err(too_short("receive packet", data.len()));
    }

    let mut cursor = std::io::Cursor::new(data);
    Ok(XBeeMessage {
        source_64: get_address_64(&mut cursor),
        source_16: get_address_16(&mut cursor),
        options: cursor.get_u8(),
        rssi: None,
        data: Bytes::copy_from_slice(&data[11..]),
    })
}

/// Parses an 802.15.4 receive packet with a 64-bit source.
///
/// Format:
/// ```text
/// [source_64:8] [rssi:1] [options:1] [data:...]
/// ```
pub fn parse_rx64(data: &[u8]) -> Result<XBeeMessage> {
    if data.len() < 10 {
        return Err(too_short("RX64 packet", data.len()));
    }

    let mut cursor = std::io::Cursor::new(data);
    Ok(XBeeMessage {
        source_64: get_address_64(&mut cursor),
        source_16: XBee16BitAddress::UNKNOWN,
        rssi: Some(cursor.get_u8()),
        options: cursor.get_u8(),
        data: Bytes::copy_from_slice(&data[10..]),
    })
}

/// Parses an 802.15.4 receive packet with a 16-bit source.
///
/// Format:
/// ```text
/// [source_16:2] [rssi:1] [options:1] [data:...]
/// ```
pub fn parse_rx16(data: &[u8]) -> Result<XBeeMessage> {
    if data.len() < 4 {
        return Err(too_short("RX16 packet", data.len()));
    }

    let mut cursor = std::io::Cursor::new(data);
    Ok(XBeeMessage {
        source_64: XBee64BitAddress::UNKNOWN,
        source_16: get_address_16(&mut cursor),
        rssi: Some(cursor.get_u8()),
        options: cursor.get_u8(),
        data: Bytes::copy_from_slice(&data[4..]),
    })
}

/// Parses an explicit receive indicator.
///
/// Format:
/// ```text
/// [source_64:8] [source_16:2] [src_ep:1] [dst_ep:1] [cluster:2] [profile:2]
/// [options:1] [data:...]
/// ```
pub fn parse_explicit_rx(data: &[u8]) -> Result<ExplicitMessage> {
    if data.len() < 17 {
        return Err(too_short("explicit RX indicator", data.len()));
    }

    let mut cursor = std::io::Cursor::new(data);
    let source_64 = get_address_64(&mut cursor);
    let source_16 = get_address_16(&mut cursor);
    let source_endpoint = cursor.get_u8();
    let destination_endpoint = cursor.get_u8();
    let cluster_id = cursor.get_u16();
    let profile_id = cursor.get_u16();
    let options = cursor.get_u8();

    Ok(ExplicitMessage {
        message: XBeeMessage {
            source_64,
            source_16,
            options,
            rssi: None,
            data: Bytes::copy_from_slice(&data[17..]),
        },
        source_endpoint,
        destination_endpoint,
        cluster_id,
        profile_id,
    })
}

/// Parses an IO data sample indicator.
///
/// Format:
/// ```text
/// [source_64:8] [source_16:2] [options:1] [sample:...]
/// ```
pub fn parse_io_sample(data: &[u8]) -> Result<IoSample> {
    if data.len() < 11 {
        return Err(too_short("IO sample", data.len()));
    }

    let mut cursor = std::io::Cursor::new(data);
    Ok(IoSample {
        source_64: get_address_64(&mut cursor),
        source_16: get_address_16(&mut cursor),
        payload: Bytes::copy_from_slice(&data[11..]),
    })
}

/// Parses an IPv4 receive packet.
///
/// Format:
/// ```text
/// [source_ip:4] [dest_port:2] [source_port:2] [protocol:1] [status:1] [data:...]
/// ```
pub fn parse_rx_ipv4(data: &[u8]) -> Result<IpMessage> {
    if data.len() < 10 {
        return Err(too_short("RX IPv4 packet", data.len()));
    }

    let mut cursor = std::io::Cursor::new(data);
    let source = Ipv4Addr::from(cursor.get_u32());
    let destination_port = cursor.get_u16();
    let source_port = cursor.get_u16();
    let protocol = IpProtocol::from_byte(cursor.get_u8());

    Ok(IpMessage {
        source,
        destination_port,
        source_port,
        protocol,
        data: Bytes::copy_from_slice(&data[10..]),
    })
}

/// Parses the value of an `ND` response into a remote device.
///
/// 802.15.4 format:
/// ```text
/// [MY:2] [SH:4] [SL:4] [RSSI:1] [NI:...]
/// ```
///
/// Other protocols:
/// ```text
/// [MY:2] [SH:4] [SL:4] [NI:...\0] [parent:2] [device_type:1] ...
/// ```
pub fn parse_discovered_node(protocol: XBeeProtocol, value: &[u8]) -> Result<RemoteXBeeDevice> {
    let minimum = if protocol == XBeeProtocol::Raw802_15_4 {
        11
    } else {
        10
    };
    if value.len() < minimum {
        return Err(too_short("node discovery response", value.len()));
    }

    let mut cursor = std::io::Cursor::new(value);
    let address_16 = get_address_16(&mut cursor);
    let address_64 = get_address_64(&mut cursor);

    if protocol == XBeeProtocol::Raw802_15_4 {
        let rssi = cursor.get_u8();
        let (node_id, _) = parse_string(&value[11..]);
        return Ok(RemoteXBeeDevice {
            address_64,
            address_16,
            node_id,
            role: None,
            rssi: Some(rssi),
        });
    }

    let (node_id, consumed) = parse_string(&value[10..]);
    // Parent address (2 bytes) precedes the device type.
    let role = value.get(10 + consumed + 2).map(|&b| NodeRole::from_byte(b));

    Ok(RemoteXBeeDevice {
        address_64,
        address_16,
        node_id,
        role,
        rssi: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_string() {
        assert_eq!(parse_string(b"hello\0world"), ("hello".into(), 6));
        assert_eq!(parse_string(b"hello"), ("hello".into(), 5));
        assert_eq!(parse_string(b""), (String::new(), 0));
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer(&[0x02]).unwrap(), 2);
        assert_eq!(parse_integer(&[0x00, 0x13, 0xA2, 0x00]).unwrap(), 0x0013_A200);
        assert!(parse_integer(&[]).is_err());
        assert!(parse_integer(&[0; 9]).is_err());
    }

    #[test]
    fn test_parse_at_command_response() {
        let data = [0x52, b'N', b'I', 0x00, b'X', b'B', b'E', b'E'];
        let response = parse_at_command_response(&data).unwrap();
        assert_eq!(response.frame_id, 0x52);
        assert_eq!(response.command, AtCommand::NI);
        assert!(response.status.is_ok());
        assert_eq!(&response.value[..], b"XBEE");

        let failed = parse_at_command_response(&[0x01, b'N', b'I', 0x03]).unwrap();
        assert_eq!(failed.status, AtCommandStatus::InvalidParameter);
        assert!(failed.value.is_empty());

        assert!(parse_at_command_response(&[0x01, b'N']).is_err());
    }

    #[test]
    fn test_parse_remote_at_command_response() {
        let mut data = vec![0x07];
        data.extend_from_slice(&0x0013_A200_4040_0A0B_u64.to_be_bytes());
        data.extend_from_slice(&[0x12, 0x34, b'M', b'Y', 0x00, 0xAB, 0xCD]);
        let response = parse_remote_at_command_response(&data).unwrap();
        assert_eq!(response.frame_id, 7);
        assert_eq!(response.source_64.value(), 0x0013_A200_4040_0A0B);
        assert_eq!(response.source_16, XBee16BitAddress::new(0x1234));
        assert_eq!(response.command, AtCommand::MY);
        assert_eq!(&response.value[..], &[0xAB, 0xCD]);
    }

    #[test]
    fn test_parse_transmit_status() {
        let status = parse_transmit_status(&[0x03, 0xFF, 0xFE, 0x01, 0x21, 0x02]).unwrap();
        assert_eq!(status.frame_id, 3);
        assert_eq!(status.retry_count, 1);
        assert!(!status.delivery_status.is_success());
        assert_eq!(status.discovery_status, 2);

        let tx = parse_tx_status(&[0x09, 0x00]).unwrap();
        assert_eq!(tx.frame_id, 9);
        assert!(tx.delivery_status.is_success());
    }

    #[test]
    fn test_parse_modem_status() {
        assert_eq!(parse_modem_status(&[0x00]).unwrap(), ModemStatus::HardwareReset);
        assert!(parse_modem_status(&[]).is_err());
    }

    #[test]
    fn test_parse_receive_packets() {
        let mut data = 0x0013_A200_4040_0A0B_u64.to_be_bytes().to_vec();
        data.extend_from_slice(&[0x56, 0x78, 0x01, b'h', b'i']);
        let msg = parse_receive_packet(&data).unwrap();
        assert_eq!(msg.source_16, XBee16BitAddress::new(0x5678));
        assert_eq!(msg.options, 1);
        assert_eq!(&msg.data[..], b"hi");
        assert!(!msg.is_broadcast());

        let rx16 = parse_rx16(&[0x12, 0x34, 0x28, 0x02, b'x']).unwrap();
        assert_eq!(rx16.source_64, XBee64BitAddress::UNKNOWN);
        assert_eq!(rx16.rssi, Some(0x28));
        assert!(rx16.is_broadcast());

        let mut rx64 = 1u64.to_be_bytes().to_vec();
        rx64.extend_from_slice(&[0x30, 0x00]);
        let msg = parse_rx64(&rx64).unwrap();
        assert_eq!(msg.source_64, XBee64BitAddress::new(1));
        assert!(msg.data.is_empty());
    }

    #[test]
    fn test_parse_explicit_rx() {
        let mut data = 2u64.to_be_bytes().to_vec();
        data.extend_from_slice(&[0x00, 0x01, 0xE8, 0xE6, 0x00, 0x11, 0xC1, 0x05, 0x01, b'z']);
        let msg = parse_explicit_rx(&data).unwrap();
        assert_eq!(msg.source_endpoint, 0xE8);
        assert_eq!(msg.destination_endpoint, 0xE6);
        assert_eq!(msg.cluster_id, 0x0011);
        assert_eq!(msg.profile_id, 0xC105);
        assert_eq!(&msg.message.data[..], b"z");
    }

    #[test]
    fn test_parse_rx_ipv4() {
        let data = [192, 168, 1, 10, 0x26, 0x16, 0x04, 0xD2, 0x00, 0x00, b'o', b'k'];
        let msg = parse_rx_ipv4(&data).unwrap();
        assert_eq!(msg.source, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(msg.destination_port, 0x2616);
        assert_eq!(msg.source_port, 1234);
        assert_eq!(msg.protocol, IpProtocol::Udp);
        assert_eq!(&msg.data[..], b"ok");
    }

    #[test]
    fn test_parse_discovered_node_zigbee() {
        let mut value = vec![0x12, 0x34];
        value.extend_from_slice(&0x0013_A200_4040_0A0B_u64.to_be_bytes());
        value.extend_from_slice(b"ROUTER1\0");
        value.extend_from_slice(&[0xFF, 0xFE, 0x01, 0x00, 0xC1, 0x05, 0x10, 0x1E]);
        let node = parse_discovered_node(XBeeProtocol::ZigBee, &value).unwrap();
        assert_eq!(node.address_16, XBee16BitAddress::new(0x1234));
        assert_eq!(node.address_64.value(), 0x0013_A200_4040_0A0B);
        assert_eq!(node.node_id, "ROUTER1");
        assert_eq!(node.role, Some(NodeRole::Router));
        assert_eq!(node.rssi, None);
    }

    #[test]
    fn test_parse_discovered_node_802() {
        let mut value = vec![0xFF, 0xFE];
        value.extend_from_slice(&5u64.to_be_bytes());
        value.push(0x2A);
        value.extend_from_slice(b"END");
        let node = parse_discovered_node(XBeeProtocol::Raw802_15_4, &value).unwrap();
        assert_eq!(node.rssi, Some(0x2A));
        assert_eq!(node.node_id, "END");
        assert_eq!(node.role, None);

        assert!(parse_discovered_node(XBeeProtocol::Raw802_15_4, &value[..10]).is_err());
    }
}
