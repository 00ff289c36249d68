//! Main [`XBeeDevice`] implementation.
//!
//! This module provides the high-level [`XBeeDevice`] that combines the
//! transport, the background reader, the correlator and the command handler
//! into a single interface for a locally attached module.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, RwLock, watch};

use crate::commands::CommandHandler;
use crate::config::DeviceConfig;
use crate::correlator::Correlator;
use crate::discovery;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, EventFilter, Subscription};
use crate::mode::{self, OperatingMode};
use crate::protocol::parser::{parse_integer, parse_string};
use crate::protocol::packet::MAX_BROADCAST_RADIUS;
use crate::protocol::{
    ApiFrame, ApiFrameType, AtCommand, ModemStatus, RemoteAtCommandRequest, TransmitRequest,
    Tx16Request, Tx64Request, TxIpv4Request,
};
use crate::queue::MessageQueue;
use crate::reader::{ReaderContext, ReaderHandle};
use crate::transport::{SerialConfig, SerialTransport, Transport};
use crate::types::{
    DeviceInfo, IpMessage, IpProtocol, RemoteXBeeDevice, XBee16BitAddress, XBee64BitAddress,
    XBeeMessage, XBeeProtocol,
};

/// A locally attached XBee module.
pub struct XBeeDevice<T> {
    transport: Arc<Mutex<T>>,
    dispatcher: EventDispatcher,
    commands: CommandHandler<T>,
    mode_tx: watch::Sender<OperatingMode>,
    config: DeviceConfig,

    // Received data, filled by the reader
    data_queue: Arc<MessageQueue<XBeeMessage>>,
    ip_queue: Arc<MessageQueue<IpMessage>>,

    device_info: RwLock<Option<DeviceInfo>>,

    reader: Option<ReaderHandle>,
}

impl XBeeDevice<SerialTransport> {
    /// Creates a device on a serial port with default settings.
    ///
    /// # Arguments
    ///
    /// * `port` - Serial port path (e.g., "/dev/ttyUSB0")
    ///
    /// # Returns
    ///
    /// A new device (not yet open).
    #[must_use]
    pub fn serial(port: impl Into<String>) -> Self {
        Self::with_serial_config(SerialConfig::new(port), DeviceConfig::default())
    }

    /// Creates a device with custom serial and device configuration.
    #[must_use]
    pub fn with_serial_config(serial: SerialConfig, config: DeviceConfig) -> Self {
        Self::new(SerialTransport::new(serial), config)
    }
}

impl<T: Transport + 'static> XBeeDevice<T> {
    /// Creates a device on an arbitrary transport.
    #[must_use]
    pub fn new(transport: T, config: DeviceConfig) -> Self {
        let dispatcher = EventDispatcher::new(config.event_capacity);
        let transport = Arc::new(Mutex::new(transport));
        let (mode_tx, mode_rx) = watch::channel(OperatingMode::Unknown);

        let mut commands = CommandHandler::new(
            Arc::clone(&transport),
            Correlator::new(),
            dispatcher.clone(),
            mode_rx,
        );
        commands.set_timeout(config.receive_timeout);

        Self {
            transport,
            dispatcher,
            commands,
            mode_tx,
            data_queue: Arc::new(MessageQueue::new(config.queue_capacity)),
            ip_queue: Arc::new(MessageQueue::new(config.queue_capacity)),
            config,
            device_info: RwLock::new(None),
            reader: None,
        }
    }

    /// Opens the connection and determines the operating mode.
    ///
    /// This will:
    /// 1. Open the transport
    /// 2. Start the background reader
    /// 3. Detect the operating mode
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperatingMode`] if the module is not in API or
    /// escaped API mode. The connection stays open in that case, so the mode
    /// can be changed and detection re-run with
    /// [`Self::detect_operating_mode`].
    pub async fn open(&mut self) -> Result<OperatingMode> {
        if self.reader_running() {
            tracing::debug!("device already open");
            return self.require_api_mode();
        }

        let reader = {
            let mut transport = self.transport.lock().await;
            transport.connect().await?;
            transport.take_reader().ok_or(Error::InterfaceNotOpen)?
        };

        mode::publish(&self.mode_tx, &self.dispatcher, OperatingMode::Unknown);
        self.reader = Some(ReaderHandle::spawn(
            reader,
            ReaderContext {
                transport: Arc::clone(&self.transport),
                correlator: self.commands.correlator().clone(),
                dispatcher: self.dispatcher.clone(),
                mode: self.mode_tx.subscribe(),
                data_queue: Arc::clone(&self.data_queue),
                ip_queue: Arc::clone(&self.ip_queue),
                max_frame_length: self.config.max_frame_length,
            },
        ));
        self.dispatcher.dispatch(Event::Connected);

        if let Err(e) = self.detect_operating_mode().await {
            tracing::error!("operating mode detection failed: {}", e);
            if let Err(close_err) = self.close().await {
                tracing::warn!("close after failed detection: {}", close_err);
            }
            return Err(e);
        }

        self.require_api_mode()
    }

    /// Stops the reader, fails outstanding requests and closes the transport.
    pub async fn close(&mut self) -> Result<()> {
        let was_running = self.reader_running();
        if let Some(reader) = self.reader.take() {
            reader.stop().await;
        }

        self.commands
            .correlator()
            .fail_all(|| Error::InterfaceNotOpen);

        let result = self.transport.lock().await.disconnect().await;
        mode::publish(&self.mode_tx, &self.dispatcher, OperatingMode::Unknown);

        // Messages from this session must not surface after a reopen
        self.data_queue.clear();
        self.ip_queue.clear();

        // The reader already announced it if the peer went away first
        if was_running {
            self.dispatcher.dispatch(Event::Disconnected);
        }
        tracing::debug!("device closed");
        result
    }

    fn reader_running(&self) -> bool {
        self.reader.as_ref().is_some_and(|r| !r.is_finished())
    }

    fn require_api_mode(&self) -> Result<OperatingMode> {
        let mode = self.operating_mode();
        if mode.is_api() {
            Ok(mode)
        } else {
            Err(Error::InvalidOperatingMode { mode })
        }
    }

    async fn ensure_open(&self) -> Result<()> {
        if self.is_open().await {
            Ok(())
        } else {
            Err(Error::InterfaceNotOpen)
        }
    }

    /// Returns true while the transport is open and the reader is running.
    pub async fn is_open(&self) -> bool {
        self.reader_running() && self.transport.lock().await.is_connected()
    }

    /// Returns the last detected operating mode.
    #[must_use]
    pub fn operating_mode(&self) -> OperatingMode {
        *self.mode_tx.borrow()
    }

    /// Runs operating mode detection again on an open device.
    ///
    /// The `AP` query is sent in plain API framing, so the device is borrowed
    /// mutably: no other request can be written while detection runs.
    pub async fn detect_operating_mode(&mut self) -> Result<OperatingMode> {
        self.ensure_open().await?;
        mode::detect(
            &self.commands,
            &self.dispatcher,
            &self.mode_tx,
            self.config.mode_detection,
        )
        .await
    }

    /// Switches the module between API and escaped API mode (`AP`).
    pub async fn set_api_mode(&self, mode: OperatingMode) -> Result<()> {
        let value = mode.ap_value().ok_or_else(|| Error::InvalidParameter {
            reason: format!("{mode} is not an API mode"),
        })?;
        self.commands.set_parameter(AtCommand::AP, vec![value]).await?;
        mode::publish(&self.mode_tx, &self.dispatcher, mode);
        Ok(())
    }

    /// Returns the protocol the device is configured for.
    #[must_use]
    pub const fn protocol(&self) -> XBeeProtocol {
        self.config.protocol
    }

    /// Returns the device configuration.
    #[must_use]
    pub const fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Sets the response timeout.
    pub fn set_receive_timeout(&mut self, timeout: Duration) {
        self.config.receive_timeout = timeout;
        self.commands.set_timeout(timeout);
    }

    /// Returns the command handler for direct frame access.
    #[must_use]
    pub const fn commands(&self) -> &CommandHandler<T> {
        &self.commands
    }

    /// Subscribes to received frames and connection events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.dispatcher.subscribe(None)
    }

    /// Subscribes to events matching `filter`.
    #[must_use]
    pub fn subscribe_filtered(&self, filter: EventFilter) -> Subscription {
        self.dispatcher.subscribe(Some(filter))
    }

    fn not_supported(&self, operation: &'static str) -> Error {
        Error::OperationNotSupported {
            operation,
            protocol: self.config.protocol,
        }
    }

    // ==================== Parameters ====================

    /// Reads a parameter of the local module.
    pub async fn get_parameter(&self, command: AtCommand) -> Result<Bytes> {
        self.commands.get_parameter(command).await
    }

    /// Writes a parameter of the local module.
    pub async fn set_parameter(&self, command: AtCommand, value: impl Into<Bytes>) -> Result<()> {
        self.commands.set_parameter(command, value).await?;
        if command == AtCommand::NI || command == AtCommand::MY {
            *self.device_info.write().await = None;
        }
        Ok(())
    }

    /// Executes a command that takes no parameter.
    pub async fn execute_command(&self, command: AtCommand) -> Result<()> {
        self.commands.execute_command(command).await
    }

    /// Applies pending parameter changes (`AC`).
    pub async fn apply_changes(&self) -> Result<()> {
        self.execute_command(AtCommand::AC).await
    }

    /// Writes parameter values to non-volatile memory (`WR`).
    pub async fn write_changes(&self) -> Result<()> {
        self.execute_command(AtCommand::WR).await
    }

    /// Performs a software reset (`FR`) and waits for the module to report it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if no reset modem status arrives within the
    /// receive timeout.
    pub async fn reset(&self) -> Result<ModemStatus> {
        // Subscribe first so the modem status cannot be missed
        let mut subscription =
            self.subscribe_filtered(EventFilter::frame_types(vec![ApiFrameType::ModemStatus]));
        self.commands.execute_command(AtCommand::FR).await?;

        let timeout = self.commands.timeout();
        let wait = async {
            while let Some(event) = subscription.recv().await {
                match event {
                    Event::ModemStatus(status) if status.is_reset() => return Some(status),
                    _ => {}
                }
            }
            None
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(Some(status)) => {
                tracing::info!("module reset: {:?}", status);
                Ok(status)
            }
            Ok(None) => Err(Error::InterfaceNotOpen),
            Err(_) => Err(Error::timeout(timeout)),
        }
    }

    /// Reads identification parameters from the module and caches them.
    pub async fn read_device_info(&self) -> Result<DeviceInfo> {
        let high = self.read_integer(AtCommand::SH).await?;
        let low = self.read_integer(AtCommand::SL).await?;
        let (node_id, _) = parse_string(&self.commands.get_parameter(AtCommand::NI).await?);
        let hardware_version = self.read_integer(AtCommand::HV).await? as u16;
        let firmware_version = self.read_integer(AtCommand::VR).await? as u32;

        // Only protocols with 16-bit addressing know MY
        let address_16 = if self.config.protocol.data_frame_type_16().is_some() {
            Some(XBee16BitAddress::new(self.read_integer(AtCommand::MY).await? as u16))
        } else {
            None
        };

        let info = DeviceInfo {
            address_64: XBee64BitAddress::from_parts(high as u32, low as u32),
            address_16,
            node_id,
            hardware_version,
            firmware_version,
        };
        tracing::debug!("device info: {:?}", info);
        *self.device_info.write().await = Some(info.clone());
        Ok(info)
    }

    async fn read_integer(&self, command: AtCommand) -> Result<u64> {
        parse_integer(&self.commands.get_parameter(command).await?)
    }

    /// Returns the cached device info, if it was read.
    pub async fn device_info(&self) -> Option<DeviceInfo> {
        self.device_info.read().await.clone()
    }

    // ==================== Data ====================

    fn data_frame(&self, destination: XBee64BitAddress, data: Bytes) -> Result<ApiFrame> {
        match self.config.protocol.data_frame_type() {
            Some(ApiFrameType::Tx64Request) => Ok(Tx64Request {
                destination,
                options: 0,
                data,
            }
            .to_frame()),
            Some(_) => Ok(TransmitRequest::new(destination, data).to_frame()),
            None => Err(self.not_supported("send_data")),
        }
    }

    fn data_frame_16(&self, destination: XBee16BitAddress, data: Bytes) -> Result<ApiFrame> {
        match self.config.protocol.data_frame_type_16() {
            Some(ApiFrameType::Tx16Request) => Ok(Tx16Request {
                destination,
                options: 0,
                data,
            }
            .to_frame()),
            Some(_) => Ok(TransmitRequest {
                destination_64: XBee64BitAddress::UNKNOWN,
                destination_16: destination,
                broadcast_radius: MAX_BROADCAST_RADIUS,
                options: 0,
                data,
            }
            .to_frame()),
            None => Err(self.not_supported("send_data_16")),
        }
    }

    /// Sends data to a 64-bit address and waits for the delivery status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transmit`] if the module reports a failed delivery.
    pub async fn send_data(
        &self,
        destination: XBee64BitAddress,
        data: impl Into<Bytes>,
    ) -> Result<()> {
        let frame = self.data_frame(destination, data.into())?;
        let status = self.commands.send_transmit(frame).await?;
        tracing::debug!("data sent to {}: {}", destination, status);
        Ok(())
    }

    /// Sends data to a 16-bit address and waits for the delivery status.
    pub async fn send_data_16(
        &self,
        destination: XBee16BitAddress,
        data: impl Into<Bytes>,
    ) -> Result<()> {
        let frame = self.data_frame_16(destination, data.into())?;
        self.commands.send_transmit(frame).await.map(|_| ())
    }

    /// Broadcasts data to every node in the network.
    pub async fn send_broadcast_data(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send_data(XBee64BitAddress::BROADCAST, data).await
    }

    /// Sends data without waiting for a delivery status.
    pub async fn send_data_async(
        &self,
        destination: XBee64BitAddress,
        data: impl Into<Bytes>,
    ) -> Result<()> {
        let frame = self.data_frame(destination, data.into())?;
        self.commands.send_async(frame).await
    }

    /// Sends data over IPv4 from a Wi-Fi or cellular module.
    pub async fn send_ip_data(
        &self,
        destination: Ipv4Addr,
        port: u16,
        protocol: IpProtocol,
        data: impl Into<Bytes>,
    ) -> Result<()> {
        if !self.config.protocol.is_ip() {
            return Err(self.not_supported("send_ip_data"));
        }
        let request = TxIpv4Request {
            destination,
            destination_port: port,
            source_port: 0,
            protocol,
            close_socket: false,
            data: data.into(),
        };
        self.commands
            .send_transmit(request.to_frame())
            .await
            .map(|_| ())
    }

    /// Waits up to `timeout` for the next received data message.
    ///
    /// Messages that arrived before the call are returned first.
    pub async fn read_data(&self, timeout: Duration) -> Result<XBeeMessage> {
        self.ensure_open().await?;
        self.data_queue
            .pop(timeout)
            .await
            .ok_or_else(|| Error::timeout(timeout))
    }

    /// Waits up to `timeout` for the next message received over IP.
    pub async fn read_ip_data(&self, timeout: Duration) -> Result<IpMessage> {
        if !self.config.protocol.is_ip() {
            return Err(self.not_supported("read_ip_data"));
        }
        self.ensure_open().await?;
        self.ip_queue
            .pop(timeout)
            .await
            .ok_or_else(|| Error::timeout(timeout))
    }

    // ==================== Remote nodes ====================

    /// Reads a parameter of a remote node.
    pub async fn get_remote_parameter(
        &self,
        destination: XBee64BitAddress,
        command: AtCommand,
    ) -> Result<Bytes> {
        if self.config.protocol.is_ip() {
            return Err(self.not_supported("get_remote_parameter"));
        }
        let request = RemoteAtCommandRequest {
            destination_64: destination,
            destination_16: XBee16BitAddress::UNKNOWN,
            command,
            parameter: Bytes::new(),
            apply_changes: false,
        };
        Ok(self.commands.send_remote_at_command(&request).await?.value)
    }

    /// Writes a parameter of a remote node and applies it immediately.
    pub async fn set_remote_parameter(
        &self,
        destination: XBee64BitAddress,
        command: AtCommand,
        value: impl Into<Bytes>,
    ) -> Result<()> {
        if self.config.protocol.is_ip() {
            return Err(self.not_supported("set_remote_parameter"));
        }
        let request = RemoteAtCommandRequest {
            destination_64: destination,
            destination_16: XBee16BitAddress::UNKNOWN,
            command,
            parameter: value.into(),
            apply_changes: true,
        };
        self.commands
            .send_remote_at_command(&request)
            .await
            .map(|_| ())
    }

    /// Discovers the nodes of the network (`ND`).
    ///
    /// The collection time is derived from the module's `N?`, `NT` and `SM`
    /// parameters.
    pub async fn discover_devices(&self) -> Result<Vec<RemoteXBeeDevice>> {
        let protocol = self.config.protocol;
        if !protocol.supports_discovery() {
            return Err(self.not_supported("discover_devices"));
        }
        self.ensure_open().await?;

        let timing = discovery::read_timing(&self.commands, protocol).await;
        let timeout = discovery::calculate_timeout(protocol, timing);
        let nodes = discovery::collect_nodes(&self.commands, protocol, timeout).await?;
        tracing::info!("discovery found {} node(s)", nodes.len());
        Ok(nodes)
    }
}
