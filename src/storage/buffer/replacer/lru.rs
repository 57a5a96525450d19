use lru::LruCache;
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU (Least Recently Used) page replacement policy.
///
/// Tracks the frames that are currently evictable, most recently unpinned
/// first. The backing order-preserving map keeps `victim`, `pin` and
/// `unpin` O(1).
pub struct LruReplacer {
    evictable: Mutex<LruCache<FrameId, ()>>,
}

impl LruReplacer {
    pub fn new(_pool_size: usize) -> Self {
        Self {
            evictable: Mutex::new(LruCache::unbounded()),
        }
    }

    /// Remove and return the least recently unpinned frame, if any
    pub fn victim(&self) -> Option<FrameId> {
        self.evictable.lock().pop_lru().map(|(frame_id, ())| frame_id)
    }

    /// A pinned frame is in use and no longer evictable
    pub fn pin(&self, frame_id: FrameId) {
        self.evictable.lock().pop(&frame_id);
    }

    /// An unpinned frame becomes evictable. A frame already known to the
    /// replacer keeps its position.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut evictable = self.evictable.lock();
        if !evictable.contains(&frame_id) {
            evictable.put(frame_id, ());
        }
    }

    /// Number of evictable frames
    pub fn size(&self) -> usize {
        self.evictable.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn victim_order_is_least_recently_unpinned() {
        let replacer = LruReplacer::new(4);
        replacer.unpin(0);
        replacer.unpin(1);
        replacer.unpin(2);
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.victim(), Some(0));
        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn pin_removes_unpin_is_idempotent() {
        let replacer = LruReplacer::new(4);
        replacer.unpin(0);
        replacer.unpin(1);
        replacer.unpin(1); // no-op, keeps position
        assert_eq!(replacer.size(), 2);

        replacer.pin(0);
        replacer.pin(3); // unknown frame, no-op
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(1));
    }
}
