use hashlink::LinkedHashSet;
use tracing::trace;

use crate::common::FrameId;

/// Eviction policy consulted by the buffer pool once its free list is empty.
///
/// Calls are serialized by the pool lock.
pub trait Replacer: Send {
    /// Removes and returns the frame to evict next, if any frame is eligible.
    fn victim(&mut self) -> Option<FrameId> {
        self.victim_where(&|_| true)
    }

    /// Like `victim`, but passes over frames for which `evictable` is false.
    /// Frames passed over keep their place in the eviction order.
    fn victim_where(&mut self, evictable: &dyn Fn(FrameId) -> bool) -> Option<FrameId>;

    /// Makes a frame ineligible for eviction. No-op if it is not tracked.
    fn pin(&mut self, frame_id: FrameId);

    /// Makes a frame eligible for eviction. No-op if it already is.
    fn unpin(&mut self, frame_id: FrameId);

    /// Number of frames currently eligible for eviction.
    fn size(&self) -> usize;
}

/// Classic least-recently-unpinned replacement.
///
/// Eligible frames sit in a linked hash set ordered by the time of their most
/// recent unpin: the front is the oldest and the next victim. Every operation
/// is O(1) except `victim_where`, which walks past the frames it skips.
pub struct LruReplacer {
    /// Number of frames this replacer can track (the pool size)
    capacity: usize,
    /// Eligible frames, least recently unpinned first
    lru_list: LinkedHashSet<FrameId>,
}

impl LruReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lru_list: LinkedHashSet::with_capacity(capacity),
        }
    }

    /// Number of frames this replacer was sized for.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Replacer for LruReplacer {
    fn victim_where(&mut self, evictable: &dyn Fn(FrameId) -> bool) -> Option<FrameId> {
        let frame_id = self.lru_list.iter().copied().find(|&id| evictable(id))?;
        self.lru_list.remove(&frame_id);
        trace!(%frame_id, "lru victim");
        Some(frame_id)
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.lru_list.remove(&frame_id);
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if frame_id.as_usize() >= self.capacity || self.lru_list.contains(&frame_id) {
            return;
        }
        self.lru_list.insert(frame_id);
    }

    fn size(&self) -> usize {
        self.lru_list.len()
    }
}
