//! API frame type definitions.
//!
//! The frame type is the first byte of the frame content and determines the
//! layout of everything that follows it.

/// API frame types understood by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ApiFrameType {
    // Requests sent to the module
    /// 802.15.4 transmit request, 64-bit destination.
    Tx64Request = 0x00,
    /// 802.15.4 transmit request, 16-bit destination.
    Tx16Request = 0x01,
    /// Local AT command, applied immediately.
    AtCommand = 0x08,
    /// Local AT command, queued until `AC`.
    AtCommandQueue = 0x09,
    /// Transmit request (ZigBee, DigiMesh, Point-to-Multipoint).
    TransmitRequest = 0x10,
    /// Explicit addressing transmit request.
    ExplicitAddressing = 0x11,
    /// Remote AT command request.
    RemoteAtCommand = 0x17,
    /// IPv4 transmit request (Wi-Fi, cellular).
    TxIpv4 = 0x20,

    // Frames received from the module
    /// 802.15.4 receive packet, 64-bit source.
    Rx64 = 0x80,
    /// 802.15.4 receive packet, 16-bit source.
    Rx16 = 0x81,
    /// 802.15.4 IO sample, 64-bit source.
    RxIo64 = 0x82,
    /// 802.15.4 IO sample, 16-bit source.
    RxIo16 = 0x83,
    /// Local AT command response.
    AtCommandResponse = 0x88,
    /// 802.15.4 transmit status.
    TxStatus = 0x89,
    /// Modem status notification.
    ModemStatus = 0x8A,
    /// Transmit status.
    TransmitStatus = 0x8B,
    /// Receive packet.
    ReceivePacket = 0x90,
    /// Explicit receive indicator.
    ExplicitRxIndicator = 0x91,
    /// IO data sample indicator.
    IoDataSample = 0x92,
    /// Node identification indicator.
    NodeIdentification = 0x95,
    /// Remote AT command response.
    RemoteAtCommandResponse = 0x97,
    /// IPv4 receive packet.
    RxIpv4 = 0xB0,
}

impl ApiFrameType {
    /// Attempts to parse a frame type from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Tx64Request),
            0x01 => Some(Self::Tx16Request),
            0x08 => Some(Self::AtCommand),
            0x09 => Some(Self::AtCommandQueue),
            0x10 => Some(Self::TransmitRequest),
            0x11 => Some(Self::ExplicitAddressing),
            0x17 => Some(Self::RemoteAtCommand),
            0x20 => Some(Self::TxIpv4),
            0x80 => Some(Self::Rx64),
            0x81 => Some(Self::Rx16),
            0x82 => Some(Self::RxIo64),
            0x83 => Some(Self::RxIo16),
            0x88 => Some(Self::AtCommandResponse),
            0x89 => Some(Self::TxStatus),
            0x8A => Some(Self::ModemStatus),
            0x8B => Some(Self::TransmitStatus),
            0x90 => Some(Self::ReceivePacket),
            0x91 => Some(Self::ExplicitRxIndicator),
            0x92 => Some(Self::IoDataSample),
            0x95 => Some(Self::NodeIdentification),
            0x97 => Some(Self::RemoteAtCommandResponse),
            0xB0 => Some(Self::RxIpv4),
            _ => None,
        }
    }

    /// Returns true if the first content byte after the type is a frame ID.
    ///
    /// Frames without one (received data, samples, modem status) are never
    /// correlated with a request.
    #[must_use]
    pub const fn has_frame_id(&self) -> bool {
        matches!(
            self,
            Self::Tx64Request
                | Self::Tx16Request
                | Self::AtCommand
                | Self::AtCommandQueue
                | Self::TransmitRequest
                | Self::ExplicitAddressing
                | Self::RemoteAtCommand
                | Self::TxIpv4
                | Self::AtCommandResponse
                | Self::TxStatus
                | Self::TransmitStatus
                | Self::RemoteAtCommandResponse
        )
    }
}

impl From<ApiFrameType> for u8 {
    fn from(frame_type: ApiFrameType) -> Self {
        frame_type as Self
    }
}
