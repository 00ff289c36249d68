//! Serial port transport.
//!
//! XBee modules are usually attached through a USB-serial bridge or a plain
//! UART.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_serial::{FlowControl, SerialPortBuilderExt, SerialStream};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportReader};

/// Default baud rate of a factory-configured XBee module.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default delay after opening the port before any traffic.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::from_millis(100);

/// How long stale bytes are drained after opening the port.
const DRAIN_WINDOW: Duration = Duration::from_millis(200);

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Delay after opening the port before sending anything.
    pub connection_delay: Duration,
    /// Use RTS/CTS flow control.
    pub hardware_flow_control: bool,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            connection_delay: DEFAULT_CONNECTION_DELAY,
            hardware_flow_control: false,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the connection delay.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }

    /// Enables RTS/CTS flow control.
    #[must_use]
    pub const fn hardware_flow_control(mut self, enabled: bool) -> Self {
        self.hardware_flow_control = enabled;
        self
    }
}

/// Serial transport for XBee communication.
///
/// The port is split so the background reader owns the read half while
/// writers share the write half through the device's transport lock.
pub struct SerialTransport {
    config: SerialConfig,
    writer: Option<WriteHalf<SerialStream>>,
    reader: Option<ReadHalf<SerialStream>>,
}

impl SerialTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub const fn new(config: SerialConfig) -> Self {
        Self {
            config,
            writer: None,
            reader: None,
        }
    }

    /// Creates a new serial transport for the given port with default settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SerialConfig {
        &self.config
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.writer.is_some() {
                return Ok(());
            }

            tracing::info!(
                "opening serial port {} at {} baud",
                self.config.port,
                self.config.baud_rate
            );

            let flow_control = if self.config.hardware_flow_control {
                FlowControl::Hardware
            } else {
                FlowControl::None
            };
            let mut stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
                .flow_control(flow_control)
                .open_native_async()
                .map_err(Error::Serial)?;

            tokio::time::sleep(self.config.connection_delay).await;

            // Discard anything the module sent before we were listening
            let mut buf = [0u8; 256];
            let mut drained = 0usize;
            let deadline = tokio::time::Instant::now() + DRAIN_WINDOW;
            while tokio::time::Instant::now() < deadline {
                match tokio::time::timeout(Duration::from_millis(20), stream.read(&mut buf)).await
                {
                    Ok(Ok(n)) if n > 0 => drained += n,
                    _ => tokio::time::sleep(Duration::from_millis(10)).await,
                }
            }
            if drained > 0 {
                tracing::debug!("drained {} stale bytes", drained);
            }

            let (reader, writer) = tokio::io::split(stream);
            self.reader = Some(reader);
            self.writer = Some(writer);

            tracing::info!("serial port open");
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.writer.is_some() || self.reader.is_some() {
                tracing::info!("closing serial port {}", self.config.port);
                self.writer = None;
                self.reader = None;
            }
            Ok(())
        })
    }

    fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let writer = self.writer.as_mut().ok_or(Error::InterfaceNotOpen)?;
            tracing::trace!("serial write {} bytes", data.len());
            writer.write_all(&data).await?;
            writer.flush().await?;
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    fn take_reader(&mut self) -> Option<TransportReader> {
        self.reader
            .take()
            .map(|reader| Box::new(reader) as TransportReader)
    }
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
