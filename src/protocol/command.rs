//! AT command names.
//!
//! An AT command is identified by two ASCII characters. The constants below
//! cover the commands the driver issues itself; any other valid pair can be
//! built with [`AtCommand::new`].

use std::fmt;

use crate::error::{Error, Result};

/// A two-character AT command name.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtCommand([u8; 2]);

impl AtCommand {
    /// API enable (operating mode).
    pub const AP: Self = Self(*b"AP");
    /// Apply queued changes.
    pub const AC: Self = Self(*b"AC");
    /// Exit command mode.
    pub const CN: Self = Self(*b"CN");
    /// Software reset.
    pub const FR: Self = Self(*b"FR");
    /// Hardware version.
    pub const HV: Self = Self(*b"HV");
    /// 16-bit network address.
    pub const MY: Self = Self(*b"MY");
    /// Network discovery options.
    pub const NO: Self = Self(*b"NO");
    /// Node discovery.
    pub const ND: Self = Self(*b"ND");
    /// Node identifier.
    pub const NI: Self = Self(*b"NI");
    /// Node discovery timeout, in 100 ms units.
    pub const NT: Self = Self(*b"NT");
    /// Maximum network discovery time, in milliseconds.
    pub const N_QUESTION: Self = Self(*b"N?");
    /// Serial number high.
    pub const SH: Self = Self(*b"SH");
    /// Serial number low.
    pub const SL: Self = Self(*b"SL");
    /// Sleep mode.
    pub const SM: Self = Self(*b"SM");
    /// Firmware version.
    pub const VR: Self = Self(*b"VR");
    /// Write settings to non-volatile memory.
    pub const WR: Self = Self(*b"WR");

    /// Creates a command from its two-character name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not exactly two printable ASCII
    /// characters.
    pub fn new(name: &str) -> Result<Self> {
        match name.as_bytes() {
            &[a, b] if a.is_ascii_graphic() && b.is_ascii_graphic() => Ok(Self([a, b])),
            _ => Err(Error::InvalidParameter {
                reason: format!("AT command must be two ASCII characters, got {name:?}"),
            }),
        }
    }

    /// Creates a command from raw bytes, as found in response frames.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 2]) -> Self {
        Self(bytes)
    }

    /// Returns the raw two-byte name.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 2] {
        &self.0
    }
}

impl fmt::Debug for AtCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtCommand({self})")
    }
}

impl fmt::Display for AtCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", char::from(self.0[0]), char::from(self.0[1]))
    }
}

impl std::str::FromStr for AtCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_command() {
        assert_eq!(AtCommand::new("NI").unwrap(), AtCommand::NI);
        assert_eq!(AtCommand::new("N?").unwrap(), AtCommand::N_QUESTION);
        assert!(AtCommand::new("N").is_err());
        assert!(AtCommand::new("NID").is_err());
        assert!(AtCommand::new("N ").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(AtCommand::AP.to_string(), "AP");
        assert_eq!("SH".parse::<AtCommand>().unwrap().as_bytes(), b"SH");
    }
}
