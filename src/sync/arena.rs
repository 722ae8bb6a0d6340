/*!
 * Monitor Arena
 *
 * Chunked slab of monitor slots. Chunks are allocated whole and never
 * freed; slots are recycled through a lock-free free queue once deflation
 * has fully retired them. Slot indices are the monitor ids embedded in
 * header words and registry links, so monitors never move.
 */

use crate::core::limits::MONITOR_CHUNK_SIZE;
use crate::core::types::MonitorId;
use crate::sync::monitor::ObjectMonitor;
use crossbeam_queue::SegQueue;
use parking_lot::RwLock;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Cheap shared reference to a monitor slot
#[derive(Clone)]
pub struct MonitorHandle {
    chunk: Arc<[ObjectMonitor]>,
    index: usize,
}

impl Deref for MonitorHandle {
    type Target = ObjectMonitor;

    #[inline]
    fn deref(&self) -> &ObjectMonitor {
        &self.chunk[self.index]
    }
}

impl std::fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandle").field("id", &self.id()).finish()
    }
}

impl MonitorHandle {
    /// Pin this monitor against deflation and recycling for the lifetime
    /// of the returned guard. Callers validate `is_deflating` after
    /// pinning; the deflater checks the pin count after raising its flag,
    /// so exactly one side backs off.
    pub fn pinned(self) -> PinnedMonitor {
        self.pin_inc();
        PinnedMonitor { handle: self }
    }
}

/// RAII pin on a monitor slot
pub struct PinnedMonitor {
    handle: MonitorHandle,
}

impl PinnedMonitor {
    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }
}

impl Deref for PinnedMonitor {
    type Target = ObjectMonitor;

    #[inline]
    fn deref(&self) -> &ObjectMonitor {
        &self.handle
    }
}

impl Drop for PinnedMonitor {
    fn drop(&mut self) {
        self.handle.pin_dec();
    }
}

impl std::fmt::Debug for PinnedMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedMonitor").field("id", &self.id()).finish()
    }
}

pub struct MonitorArena {
    chunks: RwLock<Vec<Arc<[ObjectMonitor]>>>,
    free: SegQueue<MonitorId>,
    total_slots: AtomicUsize,
}

impl MonitorArena {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            free: SegQueue::new(),
            total_slots: AtomicUsize::new(0),
        }
    }

    /// Take a free slot, growing the arena when none remain
    pub fn alloc(&self) -> MonitorHandle {
        loop {
            if let Some(id) = self.free.pop() {
                return self.get(id);
            }
            self.grow();
        }
    }

    fn grow(&self) {
        let mut chunks = self.chunks.write();
        // A racing allocator may have grown while we waited for the lock
        if !self.free.is_empty() {
            return;
        }
        let base = (chunks.len() * MONITOR_CHUNK_SIZE) as MonitorId;
        let chunk: Arc<[ObjectMonitor]> = (0..MONITOR_CHUNK_SIZE)
            .map(|i| ObjectMonitor::new(base + i as MonitorId))
            .collect();
        chunks.push(chunk);
        self.total_slots
            .fetch_add(MONITOR_CHUNK_SIZE, Ordering::Relaxed);
        for i in 0..MONITOR_CHUNK_SIZE {
            self.free.push(base + i as MonitorId);
        }
        log::debug!(
            "monitor arena grown to {} slots",
            self.total_slots.load(Ordering::Relaxed)
        );
    }

    /// Resolve a monitor id to its slot. Ids come from header words,
    /// table entries, and registry links, all of which this arena issued.
    pub fn get(&self, id: MonitorId) -> MonitorHandle {
        let chunks = self.chunks.read();
        let chunk = chunks[id as usize / MONITOR_CHUNK_SIZE].clone();
        MonitorHandle {
            chunk,
            index: id as usize % MONITOR_CHUNK_SIZE,
        }
    }

    /// Return a slot to the free queue. The slot must already be detached
    /// from its object, the table, and the registry.
    pub fn release(&self, id: MonitorId) {
        let monitor = self.get(id);
        monitor.reset();
        self.free.push(id);
    }

    pub fn capacity(&self) -> usize {
        self.total_slots.load(Ordering::Relaxed)
    }
}

impl Default for MonitorArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_assigns_stable_ids() {
        let arena = MonitorArena::new();
        let a = arena.alloc();
        let b = arena.alloc();
        assert_ne!(a.id(), b.id());
        assert_eq!(arena.get(a.id()).id(), a.id());
    }

    #[test]
    fn test_release_recycles_slot() {
        let arena = MonitorArena::new();
        let a = arena.alloc();
        let id = a.id();
        a.enter(1, 4);
        a.exit(1);
        assert!(a.try_deflate());
        drop(a);
        arena.release(id);

        // Recycled slot comes back clean
        let reused = arena.get(id);
        assert!(!reused.is_busy());
        assert!(!reused.is_deflating());
    }

    #[test]
    fn test_arena_grows_past_one_chunk() {
        let arena = MonitorArena::new();
        let handles: Vec<MonitorHandle> =
            (0..MONITOR_CHUNK_SIZE + 2).map(|_| arena.alloc()).collect();
        assert!(arena.capacity() >= 2 * MONITOR_CHUNK_SIZE);
        // All ids distinct
        let mut ids: Vec<MonitorId> = handles.iter().map(|h| h.id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), MONITOR_CHUNK_SIZE + 2);
    }
}
