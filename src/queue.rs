//! Bounded queue of received messages.
//!
//! The background reader pushes every received data message here so a
//! caller of `read_data` gets messages that arrived before it started
//! waiting. When full the oldest message is dropped.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

/// Default number of messages kept per queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// FIFO of received messages with async waiting.
pub struct MessageQueue<M> {
    items: Mutex<VecDeque<M>>,
    capacity: usize,
    notify: Notify,
}

impl<M> MessageQueue<M> {
    /// Creates a queue holding at most `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    /// Appends a message, dropping the oldest one if the queue is full.
    pub fn push(&self, message: M) {
        {
            let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
            if items.len() == self.capacity {
                items.pop_front();
                tracing::debug!("message queue full, oldest message dropped");
            }
            items.push_back(message);
        }
        self.notify.notify_one();
    }

    /// Removes and returns the oldest message, if any.
    pub fn try_pop(&self) -> Option<M> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Waits up to `timeout` for a message.
    pub async fn pop(&self, timeout: Duration) -> Option<M> {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if let Some(message) = self.try_pop() {
                    return message;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }

    /// Returns the number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no message is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every queued message.
    pub fn clear(&self) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<M> Default for MessageQueue<M> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_drops_oldest_when_full() {
        let queue = MessageQueue::new(2);
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), Some(3));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_pop_returns_queued_message() {
        let queue = MessageQueue::default();
        queue.push("early");
        assert_eq!(queue.pop(Duration::from_millis(10)).await, Some("early"));
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(MessageQueue::default());
        let producer = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push(42u32);
        });
        assert_eq!(queue.pop(Duration::from_secs(2)).await, Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_times_out() {
        let queue: MessageQueue<u8> = MessageQueue::default();
        assert_eq!(queue.pop(Duration::from_millis(100)).await, None);
    }
}
