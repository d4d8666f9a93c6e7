//! Bounded FIFO of recently transmitted frames, kept for PACKETRESEND.
//!
//! Owned by the streaming side; the control thread reaches in only through
//! [`FrameRing::lookup`]. Entries share their payload via `Arc`, so the
//! ring lock is never held across a socket send: callers clone the entry
//! out and release the lock before re-emitting.

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::camera::Frame;

/// One retained frame. `captured_at` is the platform microsecond clock at
/// capture, reused verbatim in resent leaders.
#[derive(Debug, Clone, PartialEq)]
pub struct RingEntry {
    pub block_id: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_format: u32,
    pub bytes: Arc<[u8]>,
    pub captured_at: u64,
}

/// Default number of retransmittable frames.
pub const DEFAULT_CAPACITY: usize = 3;

const STORE_LOOKUP_TIMEOUT: Duration = Duration::from_millis(100);
const CLEAR_TIMEOUT: Duration = Duration::from_millis(1000);
const LOCK_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    #[error("frame ring lock not acquired within {0:?}")]
    LockTimeout(Duration),

    #[error("block {block_id} not in ring")]
    NotFound { block_id: u32 },
}

pub type Result<T> = std::result::Result<T, RingError>;

#[derive(Debug, Default)]
struct RingInner {
    slots: Vec<Option<RingEntry>>,
    head: usize,
    stored: usize,
}

/// Fixed-capacity circular frame store.
#[derive(Debug)]
pub struct FrameRing {
    inner: Mutex<RingInner>,
    capacity: usize,
}

impl FrameRing {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "frame ring needs at least one slot");
        Self {
            inner: Mutex::new(RingInner {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                stored: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy `frame` into the slot at the head cursor, evicting the prior
    /// occupant, and tag it with `block_id`.
    pub fn store(&self, frame: &Frame, block_id: u32, captured_at: u64) -> Result<()> {
        let mut inner = self.lock_within(STORE_LOOKUP_TIMEOUT)?;
        let head = inner.head;
        inner.slots[head] = Some(RingEntry {
            block_id,
            width: frame.width,
            height: frame.height,
            pixel_format: frame.pixel_format,
            bytes: Arc::from(frame.bytes.as_slice()),
            captured_at,
        });
        inner.head = (head + 1) % self.capacity;
        inner.stored = (inner.stored + 1).min(self.capacity);
        Ok(())
    }

    /// Find the retained frame for `block_id`.
    pub fn lookup(&self, block_id: u32) -> Result<RingEntry> {
        let inner = self.lock_within(STORE_LOOKUP_TIMEOUT)?;
        inner
            .slots
            .iter()
            .flatten()
            .find(|entry| entry.block_id == block_id)
            .cloned()
            .ok_or(RingError::NotFound { block_id })
    }

    /// Number of frames currently retained.
    pub fn stored(&self) -> usize {
        self.lock_within(STORE_LOOKUP_TIMEOUT)
            .map(|inner| inner.stored)
            .unwrap_or(0)
    }

    /// Drop every retained frame.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.lock_within(CLEAR_TIMEOUT)?;
        inner.slots.iter_mut().for_each(|slot| *slot = None);
        inner.head = 0;
        inner.stored = 0;
        Ok(())
    }

    /// Acquire the ring lock, polling up to `timeout`. Timeout is surfaced
    /// to the caller with no side effects.
    fn lock_within(&self, timeout: Duration) -> Result<MutexGuard<'_, RingInner>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.inner.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(RingError::LockTimeout(timeout));
                    }
                    std::thread::sleep(LOCK_POLL);
                }
            }
        }
    }
}

impl Default for FrameRing {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::gvsp;

    fn frame(tag: u8) -> Frame {
        Frame {
            bytes: vec![tag; 64],
            width: 8,
            height: 8,
            pixel_format: gvsp::PIXEL_FORMAT_MONO8,
        }
    }

    #[test]
    fn store_then_lookup() {
        let ring = FrameRing::new();
        ring.store(&frame(7), 1, 42).unwrap();
        let entry = ring.lookup(1).unwrap();
        assert_eq!(entry.block_id, 1);
        assert_eq!(&entry.bytes[..], &[7u8; 64][..]);
        assert_eq!(entry.width, 8);
    }

    #[test]
    fn lookup_missing_is_not_found() {
        let ring = FrameRing::new();
        ring.store(&frame(1), 1, 0).unwrap();
        assert_eq!(ring.lookup(999_999), Err(RingError::NotFound { block_id: 999_999 }));
    }

    #[test]
    fn oldest_entry_is_evicted() {
        let ring = FrameRing::with_capacity(3);
        for id in 1..=4u32 {
            ring.store(&frame(id as u8), id, u64::from(id)).unwrap();
        }
        assert!(ring.lookup(1).is_err());
        for id in 2..=4u32 {
            assert_eq!(ring.lookup(id).unwrap().block_id, id);
        }
        assert_eq!(ring.stored(), 3);
    }

    #[test]
    fn clear_empties_all_slots() {
        let ring = FrameRing::new();
        ring.store(&frame(1), 1, 0).unwrap();
        ring.store(&frame(2), 2, 0).unwrap();
        ring.clear().unwrap();
        assert_eq!(ring.stored(), 0);
        assert!(ring.lookup(1).is_err());
        assert!(ring.lookup(2).is_err());
    }

    #[test]
    fn lookup_clones_share_payload() {
        let ring = FrameRing::new();
        ring.store(&frame(9), 5, 0).unwrap();
        let a = ring.lookup(5).unwrap();
        let b = ring.lookup(5).unwrap();
        assert!(Arc::ptr_eq(&a.bytes, &b.bytes));
    }
}
