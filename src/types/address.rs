//! XBee addressing.

use std::fmt;
use std::str::FromStr;

/// Length of a 64-bit address in bytes.
pub const ADDRESS_64_LEN: usize = 8;

/// Length of a 16-bit address in bytes.
pub const ADDRESS_16_LEN: usize = 2;

/// A 64-bit IEEE address (the module serial number `SH`+`SL`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct XBee64BitAddress(u64);

impl XBee64BitAddress {
    /// Coordinator address.
    pub const COORDINATOR: Self = Self(0);
    /// Broadcast address.
    pub const BROADCAST: Self = Self(0x0000_0000_0000_FFFF);
    /// Unknown address.
    pub const UNKNOWN: Self = Self(u64::MAX);

    /// Creates an address from its numeric value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Creates an address from the serial number halves.
    #[must_use]
    pub const fn from_parts(high: u32, low: u32) -> Self {
        Self(((high as u64) << 32) | low as u64)
    }

    /// Tries to create an address from big-endian bytes.
    ///
    /// Returns `None` if the slice is not exactly 8 bytes.
    #[must_use]
    pub fn try_from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; ADDRESS_64_LEN] = bytes.try_into().ok()?;
        Some(Self(u64::from_be_bytes(bytes)))
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns the big-endian bytes.
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; ADDRESS_64_LEN] {
        self.0.to_be_bytes()
    }

    /// Parses an address from a hex string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not 16 characters.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        Self::try_from_bytes(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }

    /// Returns the address as an upper-case hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.to_bytes())
    }
}

impl fmt::Debug for XBee64BitAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XBee64BitAddress({})", self.to_hex())
    }
}

impl fmt::Display for XBee64BitAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for XBee64BitAddress {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// A 16-bit network address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct XBee16BitAddress(u16);

impl XBee16BitAddress {
    /// Coordinator address.
    pub const COORDINATOR: Self = Self(0);
    /// Broadcast address.
    pub const BROADCAST: Self = Self(0xFFFF);
    /// Unknown address, used when only the 64-bit address is known.
    pub const UNKNOWN: Self = Self(0xFFFE);

    /// Creates an address from its numeric value.
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Tries to create an address from big-endian bytes.
    #[must_use]
    pub fn try_from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; ADDRESS_16_LEN] = bytes.try_into().ok()?;
        Some(Self(u16::from_be_bytes(bytes)))
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn value(&self) -> u16 {
        self.0
    }

    /// Returns the big-endian bytes.
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; ADDRESS_16_LEN] {
        self.0.to_be_bytes()
    }

    /// Parses an address from a hex string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not 4 characters.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        Self::try_from_bytes(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }

    /// Returns the address as an upper-case hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.to_bytes())
    }
}

impl fmt::Debug for XBee16BitAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XBee16BitAddress({})", self.to_hex())
    }
}

impl fmt::Display for XBee16BitAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for XBee16BitAddress {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}
