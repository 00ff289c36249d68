//! Request/response exchange with the module.
//!
//! [`CommandHandler`] stamps outgoing frames with a frame ID, writes them
//! with the framing of the current operating mode, and waits for the
//! matching response through the [`Correlator`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, watch};

use crate::correlator::Correlator;
use crate::error::{Error, Result};
use crate::event::{EventDispatcher, EventFilter, Subscription};
use crate::mode::OperatingMode;
use crate::protocol::parser::{
    parse_at_command_response, parse_remote_at_command_response, parse_transmit_status,
    parse_tx_status,
};
use crate::protocol::{
    ApiFrame, ApiFrameType, AtCommand, AtCommandRequest, AtCommandResponse, DeliveryStatus,
    RemoteAtCommandRequest, RemoteAtCommandResponse,
};
use crate::transport::Transport;

/// Default time to wait for a response frame.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);

/// Frame-level capability the device operations are written against.
///
/// Exists so higher layers can be driven by anything that can exchange
/// frames, not only a transport-backed [`CommandHandler`].
pub trait FrameTransceiver: Send + Sync {
    /// Sends a frame and waits for the response carrying its frame ID.
    fn send_and_wait(
        &self,
        frame: ApiFrame,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<ApiFrame>> + Send + '_>>;

    /// Sends a frame without waiting for anything.
    fn send_async(&self, frame: ApiFrame) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Subscribes to received frames.
    fn subscribe(&self, filter: Option<EventFilter>) -> Subscription;
}

/// Command handler for XBee operations.
pub struct CommandHandler<T> {
    transport: Arc<Mutex<T>>,
    correlator: Correlator,
    dispatcher: EventDispatcher,
    mode: watch::Receiver<OperatingMode>,
    timeout: Duration,
}

impl<T: Transport> CommandHandler<T> {
    /// Creates a new command handler.
    #[must_use]
    pub fn new(
        transport: Arc<Mutex<T>>,
        correlator: Correlator,
        dispatcher: EventDispatcher,
        mode: watch::Receiver<OperatingMode>,
    ) -> Self {
        Self {
            transport,
            correlator,
            dispatcher,
            mode,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the response timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Returns the response timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the correlator shared with the background reader.
    #[must_use]
    pub const fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    /// Returns the current operating mode.
    #[must_use]
    pub fn operating_mode(&self) -> OperatingMode {
        *self.mode.borrow()
    }

    async fn ensure_ready(&self) -> Result<()> {
        if !self.transport.lock().await.is_connected() {
            return Err(Error::InterfaceNotOpen);
        }
        let mode = self.operating_mode();
        if !mode.is_api() {
            return Err(Error::InvalidOperatingMode { mode });
        }
        Ok(())
    }

    /// Writes raw bytes, bypassing framing.
    pub(crate) async fn write_raw(&self, data: Bytes) -> Result<()> {
        let mut transport = self.transport.lock().await;
        if !transport.is_connected() {
            return Err(Error::InterfaceNotOpen);
        }
        transport.send(data).await
    }

    async fn write_frame(&self, frame: &ApiFrame) -> Result<()> {
        let escaped = self.operating_mode().is_escaped();
        let raw = frame.encode(escaped)?;
        tracing::trace!(
            "sending frame 0x{:02X} id={:?}: {}",
            frame.frame_type(),
            frame.frame_id(),
            hex::encode(&raw)
        );
        self.write_raw(raw).await
    }

    /// Sends a frame and waits for its response without checking the
    /// operating mode. Used while the mode is still being determined.
    pub(crate) async fn exchange(&self, frame: ApiFrame, timeout: Duration) -> Result<ApiFrame> {
        if !frame.kind().is_some_and(|kind| kind.has_frame_id()) {
            return Err(Error::InvalidParameter {
                reason: format!(
                    "frame type 0x{:02X} carries no frame ID",
                    frame.frame_type()
                ),
            });
        }

        let pending = self.correlator.register()?;
        let frame = frame.with_frame_id(pending.frame_id());
        self.write_frame(&frame).await?;
        pending.wait(timeout).await
    }

    /// Sends a frame and waits for the response carrying its frame ID.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidOperatingMode`] unless the module is in API
    /// or escaped API mode, and with [`Error::Timeout`] if no response
    /// arrives in time.
    pub async fn send_and_wait(&self, frame: ApiFrame, timeout: Duration) -> Result<ApiFrame> {
        self.ensure_ready().await?;
        self.exchange(frame, timeout).await
    }

    /// Sends a frame without registering a waiter.
    pub async fn send_async(&self, frame: ApiFrame) -> Result<()> {
        self.ensure_ready().await?;
        self.write_frame(&frame).await
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self, filter: Option<EventFilter>) -> Subscription {
        self.dispatcher.subscribe(filter)
    }

    // ==================== AT Commands ====================

    /// Parses an AT response and fails on a non-OK status.
    fn check_at_response(command: AtCommand, frame: &ApiFrame) -> Result<AtCommandResponse> {
        if frame.kind() != Some(ApiFrameType::AtCommandResponse) {
            return Err(Error::Protocol {
                message: format!(
                    "expected AT command response, got frame type 0x{:02X}",
                    frame.frame_type()
                ),
            });
        }
        let response = parse_at_command_response(frame.data())?;
        if response.status.is_ok() {
            Ok(response)
        } else {
            Err(Error::AtCommand {
                command: command.to_string(),
                status: response.status,
            })
        }
    }

    /// Sends a local AT command and returns its response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AtCommand`] if the module answers with a non-OK status.
    pub async fn send_at_command(&self, request: &AtCommandRequest) -> Result<AtCommandResponse> {
        let frame = self.send_and_wait(request.to_frame(), self.timeout).await?;
        Self::check_at_response(request.command, &frame)
    }

    /// Like [`Self::send_at_command`] but usable before the mode is known.
    pub(crate) async fn query_unchecked(
        &self,
        command: AtCommand,
        timeout: Duration,
    ) -> Result<Bytes> {
        let frame = self
            .exchange(AtCommandRequest::new(command).to_frame(), timeout)
            .await?;
        Ok(Self::check_at_response(command, &frame)?.value)
    }

    /// Reads a parameter value.
    pub async fn get_parameter(&self, command: AtCommand) -> Result<Bytes> {
        let response = self.send_at_command(&AtCommandRequest::new(command)).await?;
        Ok(response.value)
    }

    /// Writes a parameter value.
    pub async fn set_parameter(&self, command: AtCommand, value: impl Into<Bytes>) -> Result<()> {
        self.send_at_command(&AtCommandRequest::with_parameter(command, value))
            .await
            .map(|_| ())
    }

    /// Executes a command that takes no parameter.
    pub async fn execute_command(&self, command: AtCommand) -> Result<()> {
        self.send_at_command(&AtCommandRequest::new(command))
            .await
            .map(|_| ())
    }

    /// Sends an AT command to a remote node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AtCommand`] if the remote node answers with a non-OK
    /// status.
    pub async fn send_remote_at_command(
        &self,
        request: &RemoteAtCommandRequest,
    ) -> Result<RemoteAtCommandResponse> {
        let frame = self.send_and_wait(request.to_frame(), self.timeout).await?;
        if frame.kind() != Some(ApiFrameType::RemoteAtCommandResponse) {
            return Err(Error::Protocol {
                message: format!(
                    "expected remote AT command response, got frame type 0x{:02X}",
                    frame.frame_type()
                ),
            });
        }
        let response = parse_remote_at_command_response(frame.data())?;
        if response.status.is_ok() {
            Ok(response)
        } else {
            Err(Error::AtCommand {
                command: request.command.to_string(),
                status: response.status,
            })
        }
    }

    // ==================== Data ====================

    /// Sends a transmit frame and waits for its delivery status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transmit`] if the module reports a failed delivery.
    pub async fn send_transmit(&self, frame: ApiFrame) -> Result<DeliveryStatus> {
        let response = self.send_and_wait(frame, self.timeout).await?;
        let status = match response.kind() {
            Some(ApiFrameType::TransmitStatus) => {
                parse_transmit_status(response.data())?.delivery_status
            }
            Some(ApiFrameType::TxStatus) => parse_tx_status(response.data())?.delivery_status,
            _ => {
                return Err(Error::Protocol {
                    message: format!(
                        "expected transmit status, got frame type 0x{:02X}",
                        response.frame_type()
                    ),
                });
            }
        };

        if status.is_success() {
            Ok(status)
        } else {
            Err(Error::Transmit { status })
        }
    }
}

impl<T: Transport + 'static> FrameTransceiver for CommandHandler<T> {
    fn send_and_wait(
        &self,
        frame: ApiFrame,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<ApiFrame>> + Send + '_>> {
        Box::pin(Self::send_and_wait(self, frame, timeout))
    }

    fn send_async(&self, frame: ApiFrame) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(Self::send_async(self, frame))
    }

    fn subscribe(&self, filter: Option<EventFilter>) -> Subscription {
        Self::subscribe(self, filter)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use tokio::io::{AsyncReadExt, DuplexStream};

    use super::*;
    use crate::protocol::frame::FrameDecoder;
    use crate::transport::StreamTransport;

    struct Harness {
        handler: CommandHandler<StreamTransport<DuplexStream>>,
        mode_tx: watch::Sender<OperatingMode>,
        remote: DuplexStream,
    }

    async fn harness(mode: OperatingMode) -> Harness {
        let (local, remote) = tokio::io::duplex(1024);
        let mut transport = StreamTransport::new(local);
        transport.connect().await.unwrap();
        let (mode_tx, mode_rx) = watch::channel(mode);
        let handler = CommandHandler::new(
            Arc::new(Mutex::new(transport)),
            Correlator::new(),
            EventDispatcher::default(),
            mode_rx,
        );
        Harness {
            handler,
            mode_tx,
            remote,
        }
    }

    async fn read_frame(remote: &mut DuplexStream, escaped: bool) -> ApiFrame {
        let mut decoder = FrameDecoder::with_escaping(escaped);
        let mut buf = BytesMut::with_capacity(64);
        loop {
            if let Ok(Some(frame)) = decoder.decode() {
                return frame;
            }
            buf.clear();
            remote.read_buf(&mut buf).await.unwrap();
            decoder.feed(&buf);
        }
    }

    #[tokio::test]
    async fn test_unknown_mode_fails_fast() {
        let h = harness(OperatingMode::Unknown).await;
        let result = h.handler.get_parameter(AtCommand::NI).await;
        assert!(matches!(
            result,
            Err(Error::InvalidOperatingMode {
                mode: OperatingMode::Unknown
            })
        ));

        h.mode_tx.send_replace(OperatingMode::At);
        let result = h
            .handler
            .send_async(AtCommandRequest::new(AtCommand::NI).to_frame())
            .await;
        assert!(matches!(
            result,
            Err(Error::InvalidOperatingMode {
                mode: OperatingMode::At
            })
        ));
        assert_eq!(h.handler.correlator().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_frame_without_id_is_rejected() {
        let h = harness(OperatingMode::Api).await;
        let frame = ApiFrame::new(ApiFrameType::ModemStatus, vec![0x00]);
        let result = h.handler.send_and_wait(frame, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::InvalidParameter { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_deregisters() {
        let mut h = harness(OperatingMode::Api).await;
        let frame = AtCommandRequest::new(AtCommand::NI).to_frame();
        let result = h
            .handler
            .send_and_wait(frame, Duration::from_millis(200))
            .await;
        assert!(matches!(result, Err(Error::Timeout { timeout_ms: 200 })));
        assert_eq!(h.handler.correlator().pending_count(), 0);

        // The request still reached the wire with a real frame ID
        let sent = read_frame(&mut h.remote, false).await;
        assert_eq!(sent.frame_id(), Some(1));
    }

    #[tokio::test]
    async fn test_write_failure_deregisters() {
        let h = harness(OperatingMode::Api).await;
        h.handler.transport.lock().await.disconnect().await.unwrap();
        let frame = AtCommandRequest::new(AtCommand::NI).to_frame();
        let result = h.handler.exchange(frame, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::InterfaceNotOpen)));
        assert_eq!(h.handler.correlator().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_escaped_mode_escapes_on_the_wire() {
        let mut h = harness(OperatingMode::ApiEscaped).await;
        let frame = AtCommandRequest::with_parameter(AtCommand::NI, vec![0x7E, 0x11])
            .to_frame();
        h.handler.send_async(frame).await.unwrap();

        let mut raw = [0u8; 12];
        h.remote.read_exact(&mut raw).await.unwrap();
        assert_eq!(raw[0], 0x7E);
        assert!(!raw[1..].contains(&0x7E));
        assert!(!raw[1..].contains(&0x11));
    }

    #[tokio::test]
    async fn test_transceiver_trait_object() {
        let h = harness(OperatingMode::Unknown).await;
        let transceiver: &dyn FrameTransceiver = &h.handler;
        let result = transceiver
            .send_async(AtCommandRequest::new(AtCommand::NI).to_frame())
            .await;
        assert!(matches!(result, Err(Error::InvalidOperatingMode { .. })));
    }
}
