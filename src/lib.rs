//! # xbee
//!
//! A Rust host library for Digi XBee RF modules in API mode.
//!
//! This library talks to a locally attached module over a serial port (or any
//! byte stream), frames requests in the XBee API format, and matches every
//! response to the request that caused it.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - API and escaped API framing with automatic operating mode detection
//! - Frame ID correlation for any number of concurrent requests
//! - Event stream for unsolicited frames (received data, modem status, ...)
//! - Network discovery and remote AT commands
//!
//! ## Quick Start
//!
//! ```no_run
//! use xbee::{AtCommand, XBee64BitAddress, XBeeDevice};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), xbee::Error> {
//!     let mut device = XBeeDevice::serial("/dev/ttyUSB0");
//!     let mode = device.open().await?;
//!     println!("Operating mode: {mode}");
//!
//!     let node_id = device.get_parameter(AtCommand::NI).await?;
//!     println!("Node identifier: {}", String::from_utf8_lossy(&node_id));
//!
//!     device
//!         .send_data(XBee64BitAddress::COORDINATOR, &b"hello"[..])
//!         .await?;
//!
//!     device.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Frame codec, stream decoder, request and response packets
//! - [`types`] - Addresses, device information and received messages
//! - [`transport`] - Byte transports (serial port, generic streams)
//! - [`correlator`] - Frame ID allocation and pending request registry
//! - [`event`] - Broadcast of received frames to subscribers
//! - [`commands`] - Request/response exchange with the module
//! - [`client`] - High-level [`XBeeDevice`]

pub mod client;
pub mod commands;
pub mod config;
pub mod correlator;
pub mod discovery;
pub mod error;
pub mod event;
pub mod mode;
pub mod protocol;
pub mod queue;
mod reader;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::XBeeDevice;
pub use commands::{CommandHandler, FrameTransceiver};
pub use config::DeviceConfig;
pub use correlator::Correlator;
pub use error::{Error, FrameError, Result};
pub use event::{Event, EventDispatcher, EventFilter, Subscription};
pub use mode::OperatingMode;
pub use protocol::{
    ApiFrame, ApiFrameType, AtCommand, AtCommandStatus, DeliveryStatus, FrameDecoder, ModemStatus,
};
pub use transport::{SerialConfig, SerialTransport, StreamTransport, Transport, serial::list_ports};
pub use types::{
    DeviceInfo, ExplicitMessage, IoSample, IpMessage, IpProtocol, NodeRole, RemoteXBeeDevice,
    XBee16BitAddress, XBee64BitAddress, XBeeMessage, XBeeProtocol,
};
