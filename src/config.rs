//! Device configuration.

use std::time::Duration;

use crate::commands::DEFAULT_TIMEOUT;
use crate::event::DEFAULT_EVENT_CAPACITY;
use crate::mode::ModeDetection;
use crate::protocol::frame::DEFAULT_MAX_FRAME_LENGTH;
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::types::XBeeProtocol;

/// Configuration for an [`XBeeDevice`](crate::XBeeDevice).
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Protocol running on the module.
    pub protocol: XBeeProtocol,
    /// How long to wait for a response frame.
    pub receive_timeout: Duration,
    /// Operating mode detection settings.
    pub mode_detection: ModeDetection,
    /// Events buffered per subscriber.
    pub event_capacity: usize,
    /// Received messages kept for `read_data`.
    pub queue_capacity: usize,
    /// Largest accepted frame content length. Longer frames are dropped.
    pub max_frame_length: usize,
}

impl DeviceConfig {
    /// Creates a configuration for the given protocol with default settings.
    #[must_use]
    pub fn new(protocol: XBeeProtocol) -> Self {
        Self {
            protocol,
            receive_timeout: DEFAULT_TIMEOUT,
            mode_detection: ModeDetection::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }

    /// Sets the response timeout.
    #[must_use]
    pub const fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Sets the per-query timeout used during mode detection.
    #[must_use]
    pub const fn mode_query_timeout(mut self, timeout: Duration) -> Self {
        self.mode_detection.query_timeout = timeout;
        self
    }

    /// Sets how many `AP` queries are tried during mode detection.
    #[must_use]
    pub const fn mode_query_attempts(mut self, attempts: u32) -> Self {
        self.mode_detection.attempts = attempts;
        self
    }

    /// Sets the command-mode guard time.
    #[must_use]
    pub const fn guard_time(mut self, guard_time: Duration) -> Self {
        self.mode_detection.guard_time = guard_time;
        self
    }

    /// Sets the event buffer size.
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Sets the received message queue size.
    #[must_use]
    pub const fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the largest frame content length the reader accepts.
    #[must_use]
    pub const fn max_frame_length(mut self, length: usize) -> Self {
        self.max_frame_length = length;
        self
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new(XBeeProtocol::default())
    }
}
