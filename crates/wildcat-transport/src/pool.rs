//! # In-Flight Frame Pool
//!
//! Slab-backed store for sent-but-unconfirmed wire frames, each carrying its
//! retransmission deadline. O(1) insert/remove by handle with no heap churn
//! after the initial allocation; the deadline sweep is a linear scan, which
//! the transmission window bounds.
//!
//! Removal from the pool IS timer cancellation: a retransmission is only
//! issued for entries still present at sweep time, so an acknowledged frame
//! that was retired between arming and expiry can never be resent.

use bytes::Bytes;
use quanta::Instant;
use slab::Slab;

/// A frame awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct InflightFrame {
    /// Sequence number carried by the frame.
    pub seq: u16,
    /// The exact wire bytes, reused verbatim on retransmission.
    pub frame: Bytes,
    /// When the retransmission timer fires next.
    pub deadline: Instant,
    /// How many times this frame has been retransmitted.
    pub retries: u32,
}

/// Handle to a frame in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetransmitHandle(usize);

/// Slab-based pool of in-flight frames.
pub struct RetransmitPool {
    entries: Slab<InflightFrame>,
    capacity: usize,
}

impl RetransmitPool {
    /// Create a pool with the given capacity. The slab pre-allocates.
    pub fn new(capacity: usize) -> Self {
        RetransmitPool {
            entries: Slab::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert a frame. Returns `None` when the pool is full.
    pub fn insert(&mut self, frame: InflightFrame) -> Option<RetransmitHandle> {
        if self.entries.len() >= self.capacity {
            return None;
        }
        Some(RetransmitHandle(self.entries.insert(frame)))
    }

    pub fn get(&self, handle: RetransmitHandle) -> Option<&InflightFrame> {
        self.entries.get(handle.0)
    }

    /// Remove a frame, cancelling its pending retransmission.
    pub fn remove(&mut self, handle: RetransmitHandle) -> Option<InflightFrame> {
        if self.entries.contains(handle.0) {
            Some(self.entries.remove(handle.0))
        } else {
            None
        }
    }

    /// Handles of every frame whose deadline has passed.
    pub fn due(&self, now: Instant) -> Vec<RetransmitHandle> {
        self.entries
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(key, _)| RetransmitHandle(key))
            .collect()
    }

    /// Push a frame's deadline forward and count the retry. Returns the wire
    /// bytes to resend, or `None` if the frame was already retired.
    pub fn rearm(&mut self, handle: RetransmitHandle, deadline: Instant) -> Option<Bytes> {
        let entry = self.entries.get_mut(handle.0)?;
        entry.deadline = deadline;
        entry.retries += 1;
        Some(entry.frame.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
