//! Transport layer for XBee communication.
//!
//! A transport moves raw bytes. Framing and escaping happen above it, so the
//! same transport serves API, escaped API and AT mode alike.

pub mod serial;
pub mod stream;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::Result;

/// The read half handed to the background reader.
pub type TransportReader = Box<dyn AsyncRead + Send + Unpin>;

/// Trait for transport implementations.
pub trait Transport: Send + Sync {
    /// Connects to the device.
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Disconnects from the device.
    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Writes raw bytes to the device.
    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns true if connected.
    fn is_connected(&self) -> bool;

    /// Takes the read half for the background reader.
    ///
    /// Returns `None` when not connected or when the reader was already taken.
    fn take_reader(&mut self) -> Option<TransportReader>;
}

pub use serial::{SerialConfig, SerialTransport};
pub use stream::StreamTransport;
