//! Status codes carried by response frames.

use std::fmt;

/// Status of an AT command response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtCommandStatus {
    /// Command accepted.
    Ok,
    /// Generic error.
    Error,
    /// Command name not recognized.
    InvalidCommand,
    /// Parameter rejected.
    InvalidParameter,
    /// Remote command could not be transmitted.
    TransmissionFailure,
    /// Remote node did not answer.
    NoResponse,
    /// Any other status byte.
    Unknown(u8),
}

impl AtCommandStatus {
    /// Parses a status byte. Only the low nibble carries the status; the
    /// upper bits are flags on some firmware.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte & 0x0F {
            0x00 => Self::Ok,
            0x01 => Self::Error,
            0x02 => Self::InvalidCommand,
            0x03 => Self::InvalidParameter,
            0x04 => Self::TransmissionFailure,
            0x05 => Self::NoResponse,
            _ => Self::Unknown(byte),
        }
    }

    /// Returns true for [`AtCommandStatus::Ok`].
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for AtCommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error => write!(f, "error"),
            Self::InvalidCommand => write!(f, "invalid command"),
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::TransmissionFailure => write!(f, "transmission failure"),
            Self::NoResponse => write!(f, "no response"),
            Self::Unknown(b) => write!(f, "unknown (0x{b:02X})"),
        }
    }
}

/// Delivery status reported by transmit status frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryStatus {
    /// Delivered.
    Success,
    /// MAC acknowledgment not received.
    NoAck,
    /// Clear channel assessment failed.
    CcaFailure,
    /// Transmission purged before it was sent.
    Purged,
    /// Physical layer error.
    PhysicalError,
    /// Invalid destination endpoint.
    InvalidDestinationEndpoint,
    /// Module ran out of buffers.
    NoBuffers,
    /// Network acknowledgment not received.
    NetworkAckFailure,
    /// Module is not joined to a network.
    NotJoined,
    /// Destination is the sender itself.
    SelfAddressed,
    /// Destination address not found.
    AddressNotFound,
    /// No route to the destination.
    RouteNotFound,
    /// Broadcast relay was not heard.
    BroadcastFailed,
    /// Resource error.
    ResourceError,
    /// Payload exceeds the maximum size.
    PayloadTooLarge,
    /// Indirect message was never requested.
    IndirectMessageUnrequested,
    /// Any other status byte.
    Unknown(u8),
}

impl DeliveryStatus {
    /// Parses a delivery status byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Success,
            0x01 => Self::NoAck,
            0x02 => Self::CcaFailure,
            0x03 => Self::Purged,
            0x04 => Self::PhysicalError,
            0x15 => Self::InvalidDestinationEndpoint,
            0x18 => Self::NoBuffers,
            0x21 => Self::NetworkAckFailure,
            0x22 => Self::NotJoined,
            0x23 => Self::SelfAddressed,
            0x24 => Self::AddressNotFound,
            0x25 => Self::RouteNotFound,
            0x26 => Self::BroadcastFailed,
            0x2C | 0x32 => Self::ResourceError,
            0x74 => Self::PayloadTooLarge,
            0x75 => Self::IndirectMessageUnrequested,
            _ => Self::Unknown(byte),
        }
    }

    /// Returns true if the frame was delivered.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::NoAck => write!(f, "no acknowledgment received"),
            Self::CcaFailure => write!(f, "CCA failure"),
            Self::Purged => write!(f, "transmission purged"),
            Self::PhysicalError => write!(f, "physical error"),
            Self::InvalidDestinationEndpoint => write!(f, "invalid destination endpoint"),
            Self::NoBuffers => write!(f, "no buffers"),
            Self::NetworkAckFailure => write!(f, "network ACK failure"),
            Self::NotJoined => write!(f, "not joined to network"),
            Self::SelfAddressed => write!(f, "self-addressed"),
            Self::AddressNotFound => write!(f, "address not found"),
            Self::RouteNotFound => write!(f, "route not found"),
            Self::BroadcastFailed => write!(f, "broadcast failed"),
            Self::ResourceError => write!(f, "resource error"),
            Self::PayloadTooLarge => write!(f, "payload too large"),
            Self::IndirectMessageUnrequested => write!(f, "indirect message unrequested"),
            Self::Unknown(b) => write!(f, "unknown (0x{b:02X})"),
        }
    }
}

/// Modem status notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModemStatus {
    /// Power-up or hardware reset.
    HardwareReset,
    /// Watchdog timer reset.
    WatchdogReset,
    /// Joined a network.
    Joined,
    /// Left the network.
    Disassociated,
    /// Coordinator formed a network.
    CoordinatorStarted,
    /// Network security key updated.
    NetworkKeyUpdated,
    /// Network woke up.
    NetworkWokeUp,
    /// Network went to sleep.
    NetworkWentToSleep,
    /// Supply voltage limit exceeded.
    VoltageSupplyLimitExceeded,
    /// Configuration changed while a join was in progress.
    ModemConfigChanged,
    /// Any other status byte.
    Unknown(u8),
}

impl ModemStatus {
    /// Parses a modem status byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::HardwareReset,
            0x01 => Self::WatchdogReset,
            0x02 => Self::Joined,
            0x03 => Self::Disassociated,
            0x06 => Self::CoordinatorStarted,
            0x07 => Self::NetworkKeyUpdated,
            0x0B => Self::NetworkWokeUp,
            0x0C => Self::NetworkWentToSleep,
            0x0D => Self::VoltageSupplyLimitExceeded,
            0x11 => Self::ModemConfigChanged,
            _ => Self::Unknown(byte),
        }
    }

    /// Returns true for either kind of reset.
    #[must_use]
    pub const fn is_reset(&self) -> bool {
        matches!(self, Self::HardwareReset | Self::WatchdogReset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_status_low_nibble() {
        assert_eq!(AtCommandStatus::from_byte(0x00), AtCommandStatus::Ok);
        assert_eq!(AtCommandStatus::from_byte(0x40), AtCommandStatus::Ok);
        assert_eq!(
            AtCommandStatus::from_byte(0x03),
            AtCommandStatus::InvalidParameter
        );
        assert_eq!(
            AtCommandStatus::from_byte(0x0E),
            AtCommandStatus::Unknown(0x0E)
        );
    }

    #[test]
    fn test_delivery_status() {
        assert!(DeliveryStatus::from_byte(0x00).is_success());
        assert_eq!(DeliveryStatus::from_byte(0x24), DeliveryStatus::AddressNotFound);
        assert_eq!(DeliveryStatus::from_byte(0x99), DeliveryStatus::Unknown(0x99));
    }

    #[test]
    fn test_modem_status() {
        assert!(ModemStatus::from_byte(0x00).is_reset());
        assert!(ModemStatus::from_byte(0x01).is_reset());
        assert!(!ModemStatus::from_byte(0x02).is_reset());
    }
}
