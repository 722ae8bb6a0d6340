/*!
 * Runtime Threads
 * Per-thread monitor state (lock-stack, lock records, lookup cache,
 * held-lock accounting) and the registry the coordinator walks during
 * rendezvous
 */

use crate::core::limits::OM_CACHE_SIZE;
use crate::core::types::{MonitorId, ObjectId, ThreadId, NO_MONITOR};
use crate::sync::lock_stack::LockStack;
use crate::sync::record::RecordArea;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Small per-thread object-to-monitor lookup cache (lightweight tier).
///
/// The deflation rendezvous clears every thread's cache before monitor
/// slots are recycled; lookups and the clearing executor serialize on the
/// cache mutex, and the engine pins a monitor while still holding it.
#[derive(Debug, Default)]
pub struct OmCache {
    entries: Vec<(ObjectId, MonitorId)>,
}

impl OmCache {
    pub fn get(&self, obj: ObjectId) -> Option<MonitorId> {
        self.entries
            .iter()
            .find(|(o, _)| *o == obj)
            .map(|(_, m)| *m)
    }

    pub fn insert(&mut self, obj: ObjectId, monitor: MonitorId) {
        self.entries.retain(|(o, _)| *o != obj);
        if self.entries.len() >= OM_CACHE_SIZE {
            self.entries.remove(0);
        }
        self.entries.push((obj, monitor));
    }

    pub fn remove(&mut self, obj: ObjectId) {
        self.entries.retain(|(o, _)| *o != obj);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A thread attached to the monitor subsystem
#[derive(Debug)]
pub struct RuntimeThread {
    id: ThreadId,
    name: String,
    lock_stack: Mutex<LockStack>,
    records: RecordArea,
    om_cache: Mutex<OmCache>,
    /// Locks currently held through the engine; decremented before the
    /// per-tier exit work so handshake bookkeeping sees a consistent count
    held_count: AtomicU32,
    interrupted: AtomicBool,
    /// Monitor the thread is parked on in `wait`, for interrupt delivery
    parked_on: AtomicU32,
    /// Per-thread xorshift state for identity hash generation
    hash_state: AtomicU64,
    /// Method id the thread currently executes; sampled by the grouping
    /// sampler, never read by the locking engine
    current_method: AtomicU64,
}

impl RuntimeThread {
    fn new(id: ThreadId, name: String, hash_seed: u64) -> Self {
        Self {
            id,
            name,
            lock_stack: Mutex::new(LockStack::new()),
            records: RecordArea::new(),
            om_cache: Mutex::new(OmCache::default()),
            held_count: AtomicU32::new(0),
            interrupted: AtomicBool::new(false),
            parked_on: AtomicU32::new(NO_MONITOR),
            hash_state: AtomicU64::new(if hash_seed == 0 { 0x9E37_79B9 } else { hash_seed }),
            current_method: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lock_stack(&self) -> MutexGuard<'_, LockStack> {
        self.lock_stack.lock()
    }

    #[inline]
    pub fn records(&self) -> &RecordArea {
        &self.records
    }

    pub fn om_cache(&self) -> MutexGuard<'_, OmCache> {
        self.om_cache.lock()
    }

    #[inline]
    pub fn held_count(&self) -> u32 {
        self.held_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn inc_held(&self) {
        self.held_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn dec_held(&self) {
        // Wrapping on an unbalanced exit is tolerated; the engine restores
        // the count when it rejects the exit
        self.held_count.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Read and clear the interrupt flag
    pub fn clear_interrupted(&self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }

    pub fn set_parked_on(&self, monitor: MonitorId) {
        self.parked_on.store(monitor, Ordering::SeqCst);
    }

    pub fn clear_parked_on(&self) {
        self.parked_on.store(NO_MONITOR, Ordering::SeqCst);
    }

    pub fn parked_on(&self) -> Option<MonitorId> {
        match self.parked_on.load(Ordering::SeqCst) {
            NO_MONITOR => None,
            id => Some(id),
        }
    }

    /// Advance the thread-local xorshift state. Never returns zero.
    pub fn next_xorshift(&self) -> u64 {
        let mut x = self.hash_state.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        if x == 0 {
            x = 0x9E37_79B9;
        }
        self.hash_state.store(x, Ordering::Relaxed);
        x
    }

    pub fn set_current_method(&self, method: u64) {
        self.current_method.store(method, Ordering::Relaxed);
    }

    pub fn current_method(&self) -> u64 {
        self.current_method.load(Ordering::Relaxed)
    }
}

/// All threads attached to the runtime
pub struct ThreadRegistry {
    threads: DashMap<ThreadId, Arc<RuntimeThread>, ahash::RandomState>,
    next_id: AtomicU32,
    seeder: ahash::RandomState,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self {
            threads: DashMap::with_hasher(ahash::RandomState::new()),
            next_id: AtomicU32::new(1),
            seeder: ahash::RandomState::new(),
        }
    }

    pub fn attach(&self, name: impl Into<String>) -> Arc<RuntimeThread> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let seed = self.seeder.hash_one(id);
        let thread = Arc::new(RuntimeThread::new(id, name.into(), seed));
        self.threads.insert(id, thread.clone());
        log::debug!("thread {} ({}) attached", id, thread.name());
        thread
    }

    pub fn detach(&self, id: ThreadId) -> Option<Arc<RuntimeThread>> {
        let removed = self.threads.remove(&id).map(|(_, t)| t);
        if removed.is_some() {
            log::debug!("thread {} detached", id);
        }
        removed
    }

    pub fn get(&self, id: ThreadId) -> Option<Arc<RuntimeThread>> {
        self.threads.get(&id).map(|t| t.value().clone())
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn for_each(&self, mut f: impl FnMut(&Arc<RuntimeThread>)) {
        for entry in self.threads.iter() {
            f(entry.value());
        }
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}
