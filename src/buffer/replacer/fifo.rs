//! FIFO (First-In-First-Out) page replacement policy.
//!
//! Kept as an alternate eviction policy alongside the default
//! [`super::ClockReplacer`]; pages are evicted in the order they were
//! first brought into the buffer pool.

use std::collections::{HashSet, VecDeque};

use crate::common::FrameId;

use super::Replacer;

/// FIFO replacement policy.
///
/// Evicts pages in the order they were first brought into the buffer pool.
/// Once a frame is in the queue, re-accessing it does NOT move it to the back.
pub struct FifoReplacer {
    /// Queue of frame IDs in access order (front = oldest).
    queue: VecDeque<FrameId>,

    /// Set of frame IDs currently in the queue (for O(1) membership check).
    in_queue: HashSet<FrameId>,

    /// Set of frame IDs that are evictable (pin_count == 0).
    evictable: HashSet<FrameId>,
}

impl FifoReplacer {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            in_queue: HashSet::new(),
            evictable: HashSet::new(),
        }
    }
}

impl Default for FifoReplacer {
    fn default() -> Self {
        Self::new()
    }
}

impl Replacer for FifoReplacer {
    fn record_access(&mut self, frame_id: FrameId) {
        if !self.in_queue.contains(&frame_id) {
            self.queue.push_back(frame_id);
            self.in_queue.insert(frame_id);
        }
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        if evictable {
            self.evictable.insert(frame_id);
        } else {
            self.evictable.remove(&frame_id);
        }
    }

    fn evict(&mut self) -> Option<FrameId> {
        let position = self
            .queue
            .iter()
            .position(|&fid| self.evictable.contains(&fid))?;

        let frame_id = self.queue.remove(position)?;
        self.in_queue.remove(&frame_id);
        self.evictable.remove(&frame_id);

        Some(frame_id)
    }

    fn remove(&mut self, frame_id: FrameId) {
        self.evictable.remove(&frame_id);
        if self.in_queue.remove(&frame_id) {
            self.queue.retain(|&fid| fid != frame_id);
        }
    }

    fn size(&self) -> usize {
        self.evictable.len()
    }
}
