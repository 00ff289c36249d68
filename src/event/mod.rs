//! Event system for async frame handling.
//!
//! Every frame the background reader decodes is turned into an [`Event`] and
//! broadcast to all subscribers, whether or not it also completed a pending
//! request.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::mode::OperatingMode;
use crate::protocol::{
    ApiFrame, ApiFrameType, AtCommandResponse, ModemStatus, RemoteAtCommandResponse,
    TransmitStatus, TxStatus,
};
use crate::types::{ExplicitMessage, IoSample, IpMessage, XBee64BitAddress, XBeeMessage};

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Event types that can be dispatched.
#[derive(Debug, Clone)]
pub enum Event {
    /// Connection established.
    Connected,
    /// Connection lost or closed.
    Disconnected,
    /// Operating mode changed.
    ModeChanged(OperatingMode),
    /// Raw bytes received while the module is in AT mode.
    RawData(Bytes),
    /// Local AT command response.
    AtCommandResponse(AtCommandResponse),
    /// Remote AT command response.
    RemoteAtCommandResponse(Box<RemoteAtCommandResponse>),
    /// Transmit status.
    TransmitStatus(TransmitStatus),
    /// 802.15.4 transmit status.
    TxStatus(TxStatus),
    /// Modem status notification.
    ModemStatus(ModemStatus),
    /// Data received from a remote node.
    DataReceived(XBeeMessage),
    /// Data received with explicit addressing.
    ExplicitDataReceived(Box<ExplicitMessage>),
    /// Data received over IP.
    IpDataReceived(IpMessage),
    /// IO sample received.
    IoSample(IoSample),
    /// Any other frame, or one that could not be parsed.
    Frame(ApiFrame),
}

impl Event {
    /// Returns the frame type this event was built from, if any.
    #[must_use]
    pub fn frame_type(&self) -> Option<ApiFrameType> {
        match self {
            Self::AtCommandResponse(_) => Some(ApiFrameType::AtCommandResponse),
            Self::RemoteAtCommandResponse(_) => Some(ApiFrameType::RemoteAtCommandResponse),
            Self::TransmitStatus(_) => Some(ApiFrameType::TransmitStatus),
            Self::TxStatus(_) => Some(ApiFrameType::TxStatus),
            Self::ModemStatus(_) => Some(ApiFrameType::ModemStatus),
            Self::DataReceived(msg) => Some(if msg.rssi.is_none() {
                ApiFrameType::ReceivePacket
            } else if msg.source_64 == XBee64BitAddress::UNKNOWN {
                ApiFrameType::Rx16
            } else {
                ApiFrameType::Rx64
            }),
            Self::ExplicitDataReceived(_) => Some(ApiFrameType::ExplicitRxIndicator),
            Self::IpDataReceived(_) => Some(ApiFrameType::RxIpv4),
            Self::IoSample(_) => Some(ApiFrameType::IoDataSample),
            Self::Frame(frame) => frame.kind(),
            Self::Connected | Self::Disconnected | Self::ModeChanged(_) | Self::RawData(_) => None,
        }
    }

    /// Returns the frame ID carried by the event, if any.
    #[must_use]
    pub fn frame_id(&self) -> Option<u8> {
        match self {
            Self::AtCommandResponse(r) => Some(r.frame_id),
            Self::RemoteAtCommandResponse(r) => Some(r.frame_id),
            Self::TransmitStatus(s) => Some(s.frame_id),
            Self::TxStatus(s) => Some(s.frame_id),
            Self::Frame(frame) => frame.frame_id(),
            _ => None,
        }
    }
}

/// Subscription filter for specific event types.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by frame types.
    pub frame_types: Option<Vec<ApiFrameType>>,
    /// Filter for a specific frame ID.
    pub frame_id: Option<u8>,
}

impl EventFilter {
    /// Creates a filter for specific frame types.
    #[must_use]
    pub const fn frame_types(types: Vec<ApiFrameType>) -> Self {
        Self {
            frame_types: Some(types),
            frame_id: None,
        }
    }

    /// Creates a filter for responses of one type carrying one frame ID.
    #[must_use]
    pub fn response(frame_type: ApiFrameType, frame_id: u8) -> Self {
        Self {
            frame_types: Some(vec![frame_type]),
            frame_id: Some(frame_id),
        }
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref types) = self.frame_types {
            match event.frame_type() {
                Some(frame_type) if types.contains(&frame_type) => {}
                _ => return false,
            }
        }

        self.frame_id
            .is_none_or(|expected| event.frame_id() == Some(expected))
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
    filter: Option<EventFilter>,
}

impl Subscription {
    /// Receives the next event that passes the subscription filter.
    ///
    /// Returns `None` once the dispatcher is gone. Events missed because the
    /// subscriber lagged are skipped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.as_ref().is_none_or(|f| f.matches(&event)) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("subscriber lagged, {} events skipped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        // No receivers is fine
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to events with an optional filter.
    #[must_use]
    pub fn subscribe(&self, filter: Option<EventFilter>) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
            filter,
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
