//! Data types for XBee entities.
//!
//! This module contains the core data structures used throughout the library:
//! - 64-bit and 16-bit addresses
//! - Device information and protocol policy
//! - Received messages

pub mod address;
pub mod device;
pub mod message;

pub use address::{XBee16BitAddress, XBee64BitAddress};
pub use device::{DeviceInfo, NodeRole, RemoteXBeeDevice, XBeeProtocol};
pub use message::{ExplicitMessage, IoSample, IpMessage, IpProtocol, XBeeMessage};
