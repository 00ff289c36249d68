//! Error types for the xbee library.

use thiserror::Error;

use crate::mode::OperatingMode;
use crate::protocol::{AtCommandStatus, DeliveryStatus};
use crate::types::XBeeProtocol;

/// The main error type for xbee operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A response frame could not be interpreted.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// No response with a matching frame ID arrived in time.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The device is not in a mode that allows API frame exchange.
    #[error("invalid operating mode: {mode}")]
    InvalidOperatingMode { mode: OperatingMode },

    /// The connection interface is not open.
    #[error("connection interface is not open")]
    InterfaceNotOpen,

    /// The device answered an AT command with a non-OK status.
    #[error("AT command {command} failed with status {status}")]
    AtCommand {
        command: String,
        status: AtCommandStatus,
    },

    /// The device reported a failed delivery.
    #[error("transmission failed: {status}")]
    Transmit { status: DeliveryStatus },

    /// Every frame ID is held by an outstanding request.
    #[error("no free frame ID available")]
    NoFreeFrameId,

    /// The operation is not available for the device protocol.
    #[error("{operation} is not supported by {protocol} devices")]
    OperationNotSupported {
        operation: &'static str,
        protocol: XBeeProtocol,
    },

    /// Invalid argument supplied by the caller.
    #[error("invalid parameter: {reason}")]
    InvalidParameter { reason: String },
}

impl Error {
    /// Builds a timeout error from a duration.
    #[must_use]
    pub fn timeout(timeout: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns true if retrying the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::NoFreeFrameId)
    }
}

/// Frame-specific errors.
///
/// These are absorbed by the stream decoder, which drops the offending bytes
/// and resynchronizes on the next start delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Frame does not begin with the start delimiter.
    #[error("invalid start delimiter 0x{0:02X}")]
    InvalidDelimiter(u8),

    /// Frame too short to contain delimiter, length, type and checksum.
    #[error("frame too short: need at least 5 bytes, got {0}")]
    TooShort(usize),

    /// Frame content exceeds what the length field can express.
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    /// Declared length does not match the bytes present.
    #[error("malformed frame: declared length {declared}, found {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Declared length is zero, so there is no frame type.
    #[error("malformed frame: zero length")]
    EmptyFrame,

    /// Escape byte at the very end of the input.
    #[error("malformed frame: dangling escape byte")]
    DanglingEscape,

    /// A start delimiter began a new frame before the current one was
    /// complete.
    #[error("malformed frame: unexpected start delimiter")]
    UnexpectedDelimiter,

    /// Trailing checksum byte does not match the content.
    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Checksum { expected: u8, actual: u8 },
}

/// Result type alias for xbee operations.
pub type Result<T> = std::result::Result<T, Error>;
