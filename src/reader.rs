//! Background reader task.
//!
//! One task per open connection owns the read half of the transport. It
//! feeds received bytes to the frame decoder and, for every complete frame,
//! completes the matching pending request and broadcasts an event. In AT
//! mode the bytes are broadcast raw instead.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;

use crate::correlator::Correlator;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};
use crate::mode::OperatingMode;
use crate::protocol::parser::{
    parse_at_command_response, parse_explicit_rx, parse_io_sample, parse_modem_status,
    parse_receive_packet, parse_remote_at_command_response, parse_rx_ipv4, parse_rx16,
    parse_rx64, parse_transmit_status, parse_tx_status,
};
use crate::protocol::{ApiFrame, ApiFrameType, FrameDecoder};
use crate::queue::MessageQueue;
use crate::transport::{Transport, TransportReader};
use crate::types::{IpMessage, XBeeMessage};

const READ_BUFFER_SIZE: usize = 1024;

/// Everything the reader shares with the device.
pub(crate) struct ReaderContext<T> {
    pub transport: Arc<Mutex<T>>,
    pub correlator: Correlator,
    pub dispatcher: EventDispatcher,
    pub mode: watch::Receiver<OperatingMode>,
    pub data_queue: Arc<MessageQueue<XBeeMessage>>,
    pub ip_queue: Arc<MessageQueue<IpMessage>>,
    pub max_frame_length: usize,
}

/// Handle to a running reader task.
pub(crate) struct ReaderHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    /// Starts the reader on `reader`.
    pub fn spawn<T: Transport + 'static>(reader: TransportReader, ctx: ReaderContext<T>) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(reader, ctx, shutdown_rx));
        Self {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Returns true once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Signals the task to stop and waits for it.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("reader task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run<T: Transport>(
    mut reader: TransportReader,
    mut ctx: ReaderContext<T>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut mode = *ctx.mode.borrow_and_update();
    let mut decoder =
        FrameDecoder::with_escaping(mode.is_escaped()).max_length(ctx.max_frame_length);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    tracing::debug!("reader started in {} mode", mode);

    let outcome: Result<()> = loop {
        let n = tokio::select! {
            biased;
            _ = &mut shutdown => break Ok(()),
            result = reader.read(&mut buf) => match result {
                Ok(0) => break Err(Error::InterfaceNotOpen),
                Ok(n) => n,
                Err(e) => break Err(Error::Io(e)),
            },
        };

        if ctx.mode.has_changed().unwrap_or(false) {
            let next = *ctx.mode.borrow_and_update();
            if next.is_escaped() != decoder.is_escaped() {
                decoder.set_escaped(next.is_escaped());
            }
            mode = next;
        }

        let chunk = &buf[..n];
        tracing::trace!("read {} bytes: {}", n, hex::encode(chunk));

        if mode == OperatingMode::At {
            ctx.dispatcher
                .dispatch(Event::RawData(Bytes::copy_from_slice(chunk)));
            continue;
        }

        decoder.feed(chunk);
        loop {
            match decoder.decode() {
                Ok(Some(frame)) => handle_frame(&ctx, frame),
                Ok(None) => break,
                Err(e) => tracing::warn!("dropping corrupt frame: {}", e),
            }
        }
    };

    match outcome {
        Ok(()) => tracing::debug!("reader stopped"),
        Err(e) => {
            if matches!(e, Error::InterfaceNotOpen) {
                tracing::debug!("transport closed by peer");
            } else {
                tracing::error!("read failed: {}", e);
            }
            // Disconnect first so no new request is written once pending
            // ones have been failed.
            {
                let mut transport = ctx.transport.lock().await;
                if let Err(e) = transport.disconnect().await {
                    tracing::warn!("disconnect after read failure: {}", e);
                }
            }
            ctx.correlator.fail_all(|| Error::InterfaceNotOpen);
            ctx.dispatcher.dispatch(Event::Disconnected);
        }
    }
}

fn handle_frame<T>(ctx: &ReaderContext<T>, frame: ApiFrame) {
    tracing::trace!(
        "received frame 0x{:02X} id={:?}",
        frame.frame_type(),
        frame.frame_id()
    );

    if ctx.correlator.deliver(&frame) {
        tracing::trace!("frame completed a pending request");
    }

    let event = frame_to_event(frame, ctx);
    ctx.dispatcher.dispatch(event);
}

/// Parses `frame` with `parse`, falling back to a raw frame event.
fn parsed<V>(
    frame: ApiFrame,
    parse: impl FnOnce(&[u8]) -> Result<V>,
    wrap: impl FnOnce(V) -> Event,
) -> Event {
    match parse(&frame.data()[..]) {
        Ok(value) => wrap(value),
        Err(e) => {
            tracing::warn!("failed to parse frame 0x{:02X}: {}", frame.frame_type(), e);
            Event::Frame(frame)
        }
    }
}

/// Builds the event for a received frame, queueing data messages.
fn frame_to_event<T>(frame: ApiFrame, ctx: &ReaderContext<T>) -> Event {
    let queue_data = |msg: XBeeMessage| {
        ctx.data_queue.push(msg.clone());
        Event::DataReceived(msg)
    };

    match frame.kind() {
        Some(ApiFrameType::AtCommandResponse) => {
            parsed(frame, parse_at_command_response, Event::AtCommandResponse)
        }
        Some(ApiFrameType::RemoteAtCommandResponse) => {
            parsed(frame, parse_remote_at_command_response, |r| {
                Event::RemoteAtCommandResponse(Box::new(r))
            })
        }
        Some(ApiFrameType::TransmitStatus) => {
            parsed(frame, parse_transmit_status, Event::TransmitStatus)
        }
        Some(ApiFrameType::TxStatus) => parsed(frame, parse_tx_status, Event::TxStatus),
        Some(ApiFrameType::ModemStatus) => parsed(frame, parse_modem_status, Event::ModemStatus),
        Some(ApiFrameType::ReceivePacket) => parsed(frame, parse_receive_packet, queue_data),
        Some(ApiFrameType::Rx64) => parsed(frame, parse_rx64, queue_data),
        Some(ApiFrameType::Rx16) => parsed(frame, parse_rx16, queue_data),
        Some(ApiFrameType::ExplicitRxIndicator) => parsed(frame, parse_explicit_rx, |m| {
            Event::ExplicitDataReceived(Box::new(m))
        }),
        Some(ApiFrameType::IoDataSample) => parsed(frame, parse_io_sample, Event::IoSample),
        Some(ApiFrameType::RxIpv4) => parsed(frame, parse_rx_ipv4, |msg| {
            ctx.ip_queue.push(msg.clone());
            Event::IpDataReceived(msg)
        }),
        _ => Event::Frame(frame),
    }
}
