use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::types::FrameId;
use crate::storage::buffer::replacer::Replacer;

/// LRU (Least Recently Unpinned) page replacement policy.
///
/// Candidates are kept in unpin order: the front of the map is the least
/// recently unpinned frame and the next victim. Re-unpinning a frame that is
/// already a candidate does not refresh its position - the policy exposes set
/// semantics.
pub struct LRUReplacer {
    inner: Mutex<LRUInner>,
}

struct LRUInner {
    candidates: LinkedHashMap<FrameId, ()>,
    capacity: usize,
}

impl LRUReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LRUInner {
                candidates: LinkedHashMap::with_capacity(capacity),
                capacity,
            }),
        }
    }
}

impl Replacer for LRUReplacer {
    fn victim(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        inner.candidates.pop_front().map(|(frame_id, ())| frame_id)
    }

    fn pin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        inner.candidates.remove(&frame_id);
    }

    fn unpin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if inner.candidates.len() >= inner.capacity {
            return;
        }
        if !inner.candidates.contains_key(&frame_id) {
            inner.candidates.insert(frame_id, ());
        }
    }

    fn size(&self) -> usize {
        let inner = self.inner.lock();
        inner.candidates.len()
    }
}
