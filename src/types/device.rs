//! Device information types and protocol policy.

use std::fmt;
use std::time::Duration;

use crate::protocol::ApiFrameType;
use crate::types::address::{XBee16BitAddress, XBee64BitAddress};

/// Network propagation allowance added to `NT` on DigiMesh and
/// Point-to-Multipoint networks.
pub const DIGIMESH_PROPAGATION_TIME: Duration = Duration::from_millis(900);

/// Protocol family running on the module.
///
/// Protocol-specific behavior is expressed as small policy methods here
/// instead of per-protocol device types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum XBeeProtocol {
    /// IEEE 802.15.4.
    Raw802_15_4,
    /// ZigBee.
    #[default]
    ZigBee,
    /// DigiMesh.
    DigiMesh,
    /// Point-to-Multipoint (DigiPoint).
    PointToMultipoint,
    /// Wi-Fi.
    WiFi,
    /// Cellular.
    Cellular,
    /// Thread.
    Thread,
    /// Not determined.
    Unknown,
}

impl XBeeProtocol {
    /// Frame type used to send data to a 64-bit destination.
    ///
    /// Returns `None` for protocols that do not use radio addressing.
    #[must_use]
    pub const fn data_frame_type(self) -> Option<ApiFrameType> {
        match self {
            Self::Raw802_15_4 => Some(ApiFrameType::Tx64Request),
            Self::ZigBee | Self::DigiMesh | Self::PointToMultipoint | Self::Unknown => {
                Some(ApiFrameType::TransmitRequest)
            }
            Self::WiFi | Self::Cellular | Self::Thread => None,
        }
    }

    /// Frame type used to send data to a 16-bit destination.
    #[must_use]
    pub const fn data_frame_type_16(self) -> Option<ApiFrameType> {
        match self {
            Self::Raw802_15_4 => Some(ApiFrameType::Tx16Request),
            Self::ZigBee => Some(ApiFrameType::TransmitRequest),
            _ => None,
        }
    }

    /// Returns true for modules that exchange data over IPv4.
    #[must_use]
    pub const fn is_ip(self) -> bool {
        matches!(self, Self::WiFi | Self::Cellular)
    }

    /// Returns true if the `ND` command is available.
    #[must_use]
    pub const fn supports_discovery(self) -> bool {
        !matches!(self, Self::WiFi | Self::Cellular | Self::Thread)
    }

    /// Extra time beyond `NT` that discovery responses may take to arrive.
    #[must_use]
    pub const fn discovery_propagation_time(self) -> Duration {
        match self {
            Self::DigiMesh | Self::PointToMultipoint => DIGIMESH_PROPAGATION_TIME,
            _ => Duration::ZERO,
        }
    }
}

impl fmt::Display for XBeeProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Raw802_15_4 => "802.15.4",
            Self::ZigBee => "ZigBee",
            Self::DigiMesh => "DigiMesh",
            Self::PointToMultipoint => "Point-to-Multipoint",
            Self::WiFi => "Wi-Fi",
            Self::Cellular => "Cellular",
            Self::Thread => "Thread",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Role of a node in a ZigBee-style network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    /// Network coordinator.
    Coordinator,
    /// Router.
    Router,
    /// End device.
    EndDevice,
    /// Any other role byte.
    Unknown(u8),
}

impl NodeRole {
    /// Parses a device type byte from a discovery response.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Self::Coordinator,
            1 => Self::Router,
            2 => Self::EndDevice,
            _ => Self::Unknown(byte),
        }
    }
}

/// Information read from the local module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// 64-bit address (`SH` + `SL`).
    pub address_64: XBee64BitAddress,
    /// 16-bit address (`MY`), when the protocol has one.
    pub address_16: Option<XBee16BitAddress>,
    /// Node identifier (`NI`).
    pub node_id: String,
    /// Hardware version (`HV`).
    pub hardware_version: u16,
    /// Firmware version (`VR`), as the raw value.
    pub firmware_version: u32,
}

/// A node found by network discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteXBeeDevice {
    /// 64-bit address.
    pub address_64: XBee64BitAddress,
    /// 16-bit address.
    pub address_16: XBee16BitAddress,
    /// Node identifier.
    pub node_id: String,
    /// Network role, if reported.
    pub role: Option<NodeRole>,
    /// Signal strength in -dBm, reported by 802.15.4 only.
    pub rssi: Option<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_frame_policy() {
        assert_eq!(
            XBeeProtocol::Raw802_15_4.data_frame_type(),
            Some(ApiFrameType::Tx64Request)
        );
        assert_eq!(
            XBeeProtocol::DigiMesh.data_frame_type(),
            Some(ApiFrameType::TransmitRequest)
        );
        assert_eq!(XBeeProtocol::Cellular.data_frame_type(), None);
        assert_eq!(XBeeProtocol::DigiMesh.data_frame_type_16(), None);
    }

    #[test]
    fn test_discovery_policy() {
        assert!(XBeeProtocol::ZigBee.supports_discovery());
        assert!(!XBeeProtocol::WiFi.supports_discovery());
        assert_eq!(
            XBeeProtocol::PointToMultipoint.discovery_propagation_time(),
            DIGIMESH_PROPAGATION_TIME
        );
        assert_eq!(
            XBeeProtocol::ZigBee.discovery_propagation_time(),
            Duration::ZERO
        );
    }
}
