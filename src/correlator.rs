//! Frame ID allocation and response matching.
//!
//! Every request that expects an answer takes a frame ID from the
//! [`Correlator`] and parks a single-shot channel under it. The background
//! reader hands each received frame to [`Correlator::deliver`], which
//! completes the waiter whose ID matches.
//!
//! The registry lives behind one short-held mutex. It is never held across
//! an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::protocol::ApiFrame;

/// Highest frame ID. ID 0 means "no response requested" and is never issued.
pub const MAX_FRAME_ID: u8 = 0xFF;

type Reply = Result<ApiFrame>;

enum Slot {
    Waiting {
        token: u64,
        tx: oneshot::Sender<Reply>,
    },
    Reserved {
        token: u64,
    },
}

impl Slot {
    const fn token(&self) -> u64 {
        match self {
            Self::Waiting { token, .. } | Self::Reserved { token } => *token,
        }
    }
}

#[derive(Default)]
struct Registry {
    last_id: u8,
    next_token: u64,
    slots: HashMap<u8, Slot>,
}

impl Registry {
    /// Picks the next free ID after the last one issued, wrapping 255 -> 1.
    fn allocate(&mut self) -> Result<(u8, u64)> {
        for _ in 0..MAX_FRAME_ID {
            self.last_id = if self.last_id == MAX_FRAME_ID {
                1
            } else {
                self.last_id + 1
            };
            if !self.slots.contains_key(&self.last_id) {
                self.next_token = self.next_token.wrapping_add(1);
                return Ok((self.last_id, self.next_token));
            }
        }
        Err(Error::NoFreeFrameId)
    }

    fn release(&mut self, frame_id: u8, token: u64) {
        if self
            .slots
            .get(&frame_id)
            .is_some_and(|slot| slot.token() == token)
        {
            self.slots.remove(&frame_id);
        }
    }
}

/// Per-connection frame ID pool and pending request registry.
#[derive(Clone, Default)]
pub struct Correlator {
    registry: Arc<Mutex<Registry>>,
}

impl Correlator {
    /// Creates an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates a frame ID and registers a waiter for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoFreeFrameId`] if all 255 IDs are in use.
    pub fn register(&self) -> Result<PendingResponse> {
        let (tx, rx) = oneshot::channel();
        let mut registry = self.lock();
        let (frame_id, token) = registry.allocate()?;
        registry.slots.insert(frame_id, Slot::Waiting { token, tx });
        drop(registry);

        tracing::trace!("registered frame ID {}", frame_id);
        Ok(PendingResponse {
            frame_id,
            token,
            rx,
            registry: Arc::clone(&self.registry),
        })
    }

    /// Reserves a frame ID without a waiter.
    ///
    /// Used when one request produces several responses that are consumed
    /// from the event stream. The ID stays reserved until the guard drops.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoFreeFrameId`] if all 255 IDs are in use.
    pub fn reserve(&self) -> Result<FrameIdGuard> {
        let mut registry = self.lock();
        let (frame_id, token) = registry.allocate()?;
        registry.slots.insert(frame_id, Slot::Reserved { token });
        drop(registry);

        tracing::trace!("reserved frame ID {}", frame_id);
        Ok(FrameIdGuard {
            frame_id,
            token,
            registry: Arc::clone(&self.registry),
        })
    }

    /// Completes the waiter whose frame ID matches `frame`.
    ///
    /// Returns true if a waiter was completed. Frames without a frame ID,
    /// with ID 0, or with an ID that is reserved or unknown are left for
    /// listeners only.
    pub fn deliver(&self, frame: &ApiFrame) -> bool {
        let Some(frame_id) = frame.frame_id().filter(|&id| id != 0) else {
            return false;
        };

        let mut registry = self.lock();
        if !matches!(registry.slots.get(&frame_id), Some(Slot::Waiting { .. })) {
            return false;
        }
        let Some(Slot::Waiting { tx, .. }) = registry.slots.remove(&frame_id) else {
            return false;
        };
        drop(registry);

        if tx.send(Ok(frame.clone())).is_err() {
            tracing::trace!("waiter for frame ID {} already gone", frame_id);
        }
        true
    }

    /// Fails every waiting request with an error built by `error`.
    ///
    /// Reserved IDs are left to their guards.
    pub fn fail_all(&self, error: impl Fn() -> Error) {
        let mut registry = self.lock();
        let waiting: Vec<u8> = registry
            .slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Waiting { .. }))
            .map(|(&id, _)| id)
            .collect();
        let senders: Vec<_> = waiting
            .into_iter()
            .filter_map(|id| match registry.slots.remove(&id) {
                Some(Slot::Waiting { tx, .. }) => Some(tx),
                _ => None,
            })
            .collect();
        drop(registry);

        if !senders.is_empty() {
            tracing::debug!("failing {} pending requests", senders.len());
        }
        for tx in senders {
            let _ = tx.send(Err(error()));
        }
    }

    /// Returns the number of IDs currently in use.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().slots.len()
    }
}

/// A registered request waiting for its response.
///
/// Dropping it before the response arrives releases the frame ID.
pub struct PendingResponse {
    frame_id: u8,
    token: u64,
    rx: oneshot::Receiver<Reply>,
    registry: Arc<Mutex<Registry>>,
}

impl PendingResponse {
    /// Returns the allocated frame ID.
    #[must_use]
    pub const fn frame_id(&self) -> u8 {
        self.frame_id
    }

    /// Waits for the matching response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if nothing arrives in time, or the error
    /// the request was failed with (typically [`Error::InterfaceNotOpen`]).
    pub async fn wait(mut self, timeout: Duration) -> Result<ApiFrame> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(Error::InterfaceNotOpen),
            Err(_) => {
                tracing::debug!("frame ID {} timed out", self.frame_id);
                Err(Error::timeout(timeout))
            }
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(self.frame_id, self.token);
    }
}

/// Holds a reserved frame ID until dropped.
pub struct FrameIdGuard {
    frame_id: u8,
    token: u64,
    registry: Arc<Mutex<Registry>>,
}

impl FrameIdGuard {
    /// Returns the reserved frame ID.
    #[must_use]
    pub const fn frame_id(&self) -> u8 {
        self.frame_id
    }
}

impl Drop for FrameIdGuard {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(self.frame_id, self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ApiFrameType;

    fn at_response(frame_id: u8) -> ApiFrame {
        ApiFrame::new(
            ApiFrameType::AtCommandResponse,
            vec![frame_id, b'N', b'I', 0x00],
        )
    }

    #[test]
    fn test_ids_start_at_one_and_wrap() {
        let correlator = Correlator::new();
        let first = correlator.register().unwrap();
        assert_eq!(first.frame_id(), 1);
        drop(first);

        for expected in 2..=255u8 {
            assert_eq!(correlator.register().unwrap().frame_id(), expected);
        }
        assert_eq!(correlator.register().unwrap().frame_id(), 1);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_pending_ids_are_skipped() {
        let correlator = Correlator::new();
        let held = correlator.register().unwrap();
        for _ in 0..254 {
            let pending = correlator.register().unwrap();
            assert_ne!(pending.frame_id(), held.frame_id());
        }
        // Wrapped past 255; ID 1 is still held.
        assert_eq!(correlator.register().unwrap().frame_id(), 2);
    }

    #[test]
    fn test_exhaustion() {
        let correlator = Correlator::new();
        let held: Vec<_> = (0..255).map(|_| correlator.register().unwrap()).collect();
        assert!(matches!(correlator.register(), Err(Error::NoFreeFrameId)));
        assert!(matches!(correlator.reserve(), Err(Error::NoFreeFrameId)));
        drop(held);
        assert!(correlator.register().is_ok());
    }

    #[tokio::test]
    async fn test_deliver_completes_waiter() {
        let correlator = Correlator::new();
        let pending = correlator.register().unwrap();
        let id = pending.frame_id();

        assert!(correlator.deliver(&at_response(id)));
        let frame = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(frame.frame_id(), Some(id));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_deliver_ignores_unmatched_frames() {
        let correlator = Correlator::new();
        let pending = correlator.register().unwrap();

        assert!(!correlator.deliver(&at_response(pending.frame_id() + 1)));
        assert!(!correlator.deliver(&at_response(0)));
        assert!(!correlator.deliver(&ApiFrame::new(ApiFrameType::ModemStatus, vec![0x01])));
        assert_eq!(correlator.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_id() {
        let correlator = Correlator::new();
        let pending = correlator.register().unwrap();

        let start = tokio::time::Instant::now();
        let result = pending.wait(Duration::from_millis(500)).await;
        assert!(matches!(result, Err(Error::Timeout { timeout_ms: 500 })));
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_stale_drop_keeps_new_owner() {
        let correlator = Correlator::new();
        let old = correlator.register().unwrap();
        let id = old.frame_id();
        assert!(correlator.deliver(&at_response(id)));

        // Force reuse of the same ID while the old handle is still alive.
        for _ in 0..254 {
            drop(correlator.register().unwrap());
        }
        let new = correlator.register().unwrap();
        assert_eq!(new.frame_id(), id);

        drop(old);
        assert_eq!(correlator.pending_count(), 1);
        drop(new);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_all() {
        let correlator = Correlator::new();
        let a = correlator.register().unwrap();
        let b = correlator.register().unwrap();
        let guard = correlator.reserve().unwrap();

        correlator.fail_all(|| Error::InterfaceNotOpen);

        assert!(matches!(
            a.wait(Duration::from_secs(1)).await,
            Err(Error::InterfaceNotOpen)
        ));
        assert!(matches!(
            b.wait(Duration::from_secs(1)).await,
            Err(Error::InterfaceNotOpen)
        ));
        assert_eq!(correlator.pending_count(), 1);
        drop(guard);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_reserved_id_is_listener_only() {
        let correlator = Correlator::new();
        let guard = correlator.reserve().unwrap();
        assert!(!correlator.deliver(&at_response(guard.frame_id())));
        assert_eq!(correlator.pending_count(), 1);
        assert_ne!(correlator.register().unwrap().frame_id(), guard.frame_id());
    }
}
