/*!
 * Monitor Object
 *
 * The heavyweight lock record: owner, recursion count, displaced-header
 * snapshot, wait-set, entry queue, deflation flags, and the intrusive
 * registry link. Monitors live in arena slots, are never moved, and are
 * recycled only after deflation has unlinked them and a thread rendezvous
 * has completed.
 *
 * The `entries` counter doubles as a pin count: any thread about to operate
 * on a monitor it resolved from a header, table, or cache increments it
 * first and re-checks `deflating` afterwards. The deflater performs the
 * mirror-image check (flag first, then `entries`), so with sequentially
 * consistent ordering exactly one side backs off.
 */

use crate::core::errors::WaitStatus;
use crate::core::types::{MonitorId, ThreadId, NO_MONITOR};
use crate::runtime::object::{Obj, RuntimeObject};
use crate::runtime::thread::RuntimeThread;
use crate::sync::header::{HeaderWord, MarkWord};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Monitor ownership.
///
/// `Anonymous` means "owned by some thread through the lightweight tier,
/// not yet resolved"; the thread holding the lock-stack entry claims the
/// monitor lazily. `Deflater` marks the window in which the coordinator
/// has claimed an idle monitor for reclamation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    None,
    Anonymous,
    Deflater,
    Thread(ThreadId),
}

const OWNER_NONE: u64 = 0;
const OWNER_ANONYMOUS: u64 = 1;
const OWNER_DEFLATER: u64 = 2;
const OWNER_THREAD_TAG: u64 = 3;

impl Owner {
    #[inline]
    fn encode(self) -> u64 {
        match self {
            Owner::None => OWNER_NONE,
            Owner::Anonymous => OWNER_ANONYMOUS,
            Owner::Deflater => OWNER_DEFLATER,
            Owner::Thread(tid) => ((tid as u64) << 2) | OWNER_THREAD_TAG,
        }
    }

    #[inline]
    fn decode(raw: u64) -> Self {
        match raw & 0b11 {
            OWNER_THREAD_TAG => Owner::Thread((raw >> 2) as ThreadId),
            _ => match raw {
                OWNER_ANONYMOUS => Owner::Anonymous,
                OWNER_DEFLATER => Owner::Deflater,
                _ => Owner::None,
            },
        }
    }
}

/// Outcome of a blocking enter attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnterOutcome {
    Entered,
    /// The monitor is being deflated; re-read the object header and retry
    Deflated,
}

enum TryLock {
    Acquired,
    Busy,
    Deflated,
}

#[derive(Debug)]
struct WaitNode {
    thread: ThreadId,
    notified: AtomicBool,
}

#[derive(Debug)]
pub struct ObjectMonitor {
    id: MonitorId,
    /// Back-reference to the locked object; weak, because the collector may
    /// reclaim the object while its monitor is still registered
    object: Mutex<Weak<RuntimeObject>>,
    owner: AtomicU64,
    /// Nested acquisitions beyond the first; only the owner mutates it
    recursion: AtomicU32,
    /// Displaced header snapshot; carries the identity hash once assigned
    header: HeaderWord,
    /// Contending entrants plus transient pins
    entries: AtomicU32,
    /// Threads parked in `wait`, up to and including lock re-acquisition
    waiters: AtomicU32,
    /// Asynchronous deflation claimed this monitor
    deflating: AtomicBool,
    /// In-use registry link: next monitor slot, or NO_MONITOR
    next: AtomicU32,

    entry_lock: Mutex<()>,
    entry_cv: Condvar,
    wait_lock: Mutex<()>,
    wait_cv: Condvar,
    wait_set: Mutex<VecDeque<Arc<WaitNode>>>,
}

impl ObjectMonitor {
    pub fn new(id: MonitorId) -> Self {
        Self {
            id,
            object: Mutex::new(Weak::new()),
            owner: AtomicU64::new(OWNER_NONE),
            recursion: AtomicU32::new(0),
            header: HeaderWord::new(),
            entries: AtomicU32::new(0),
            waiters: AtomicU32::new(0),
            deflating: AtomicBool::new(false),
            next: AtomicU32::new(NO_MONITOR),
            entry_lock: Mutex::new(()),
            entry_cv: Condvar::new(),
            wait_lock: Mutex::new(()),
            wait_cv: Condvar::new(),
            wait_set: Mutex::new(VecDeque::new()),
        }
    }

    #[inline]
    pub fn id(&self) -> MonitorId {
        self.id
    }

    /// Bind a freshly allocated monitor to its object before publication
    pub fn prepare(&self, obj: &Obj, displaced: MarkWord, owner: Owner) {
        *self.object.lock() = Arc::downgrade(obj);
        self.header.store(displaced);
        self.owner.store(owner.encode(), Ordering::SeqCst);
        self.recursion.store(0, Ordering::Relaxed);
        self.next.store(NO_MONITOR, Ordering::Relaxed);
    }

    /// Clear for slot recycling. Only called after unlink plus rendezvous.
    pub fn reset(&self) {
        *self.object.lock() = Weak::new();
        self.owner.store(OWNER_NONE, Ordering::SeqCst);
        self.recursion.store(0, Ordering::Relaxed);
        self.header.store(MarkWord::neutral());
        self.next.store(NO_MONITOR, Ordering::Relaxed);
        self.deflating.store(false, Ordering::SeqCst);
        self.wait_set.lock().clear();
    }

    /// The object this monitor guards, unless the collector reclaimed it
    pub fn object(&self) -> Option<Obj> {
        self.object.lock().upgrade()
    }

    pub fn guards(&self, obj: &Obj) -> bool {
        self.object()
            .map(|o| RuntimeObject::same(&o, obj))
            .unwrap_or(false)
    }

    #[inline]
    pub fn header(&self) -> &HeaderWord {
        &self.header
    }

    #[inline]
    pub fn owner(&self) -> Owner {
        Owner::decode(self.owner.load(Ordering::SeqCst))
    }

    #[inline]
    pub fn cas_owner(&self, expected: Owner, new: Owner) -> bool {
        self.owner
            .compare_exchange(
                expected.encode(),
                new.encode(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    #[inline]
    pub fn recursion(&self) -> u32 {
        self.recursion.load(Ordering::Relaxed)
    }

    pub fn set_recursion(&self, n: u32) {
        self.recursion.store(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn waiters(&self) -> u32 {
        self.waiters.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn contentions(&self) -> u32 {
        self.entries.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_deflating(&self) -> bool {
        self.deflating.load(Ordering::SeqCst)
    }

    /// Owned, contended, or carrying waiters: ineligible for deflation
    pub fn is_busy(&self) -> bool {
        self.owner() != Owner::None
            || self.contentions() > 0
            || self.waiters() > 0
    }

    /// Safe for the registry to unlink: flagged deflating AND fully
    /// detached (the deflater hands ownership over only after the header
    /// and table association are gone)
    pub fn is_reclaimable(&self) -> bool {
        self.is_deflating() && self.owner() == Owner::Deflater
    }

    #[inline]
    pub fn next_link(&self) -> MonitorId {
        self.next.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_next_link(&self, next: MonitorId) {
        self.next.store(next, Ordering::Release);
    }

    #[inline]
    pub fn cas_next_link(&self, expected: MonitorId, next: MonitorId) -> bool {
        self.next
            .compare_exchange(expected, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Raise the pin count, keeping the monitor safe from deflation and
    /// recycling while a caller validates and uses it. Every `pin_inc`
    /// must be paired with `pin_dec`; `PinnedMonitor` does this via RAII.
    #[inline]
    pub(crate) fn pin_inc(&self) {
        self.entries.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn pin_dec(&self) {
        self.entries.fetch_sub(1, Ordering::SeqCst);
    }

    fn try_lock(&self, tid: ThreadId) -> TryLock {
        match self.owner() {
            Owner::None => {
                if self.cas_owner(Owner::None, Owner::Thread(tid)) {
                    TryLock::Acquired
                } else {
                    TryLock::Busy
                }
            }
            Owner::Thread(t) if t == tid => {
                self.recursion.fetch_add(1, Ordering::Relaxed);
                TryLock::Acquired
            }
            Owner::Deflater => TryLock::Deflated,
            _ => TryLock::Busy,
        }
    }

    /// Blocking enter. `Deflated` means the caller must re-read the object
    /// header and retry from the top of the locking protocol.
    pub fn enter(&self, tid: ThreadId, spin_limit: u32) -> EnterOutcome {
        self.entries.fetch_add(1, Ordering::SeqCst);
        let outcome = self.enter_contended(tid, spin_limit);
        self.entries.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn enter_contended(&self, tid: ThreadId, spin_limit: u32) -> EnterOutcome {
        if self.deflating.load(Ordering::SeqCst) {
            return EnterOutcome::Deflated;
        }
        for _ in 0..spin_limit {
            match self.try_lock(tid) {
                TryLock::Acquired => return EnterOutcome::Entered,
                TryLock::Deflated => return EnterOutcome::Deflated,
                TryLock::Busy => std::hint::spin_loop(),
            }
        }
        let mut guard = self.entry_lock.lock();
        loop {
            match self.try_lock(tid) {
                TryLock::Acquired => return EnterOutcome::Entered,
                TryLock::Deflated => return EnterOutcome::Deflated,
                TryLock::Busy => self.entry_cv.wait(&mut guard),
            }
        }
    }

    /// Release one level of ownership
    pub fn exit(&self, tid: ThreadId) {
        debug_assert_eq!(self.owner(), Owner::Thread(tid));
        let r = self.recursion.load(Ordering::Relaxed);
        if r > 0 {
            self.recursion.store(r - 1, Ordering::Relaxed);
            return;
        }
        self.release();
    }

    fn release(&self) {
        self.owner.store(OWNER_NONE, Ordering::SeqCst);
        let _guard = self.entry_lock.lock();
        self.entry_cv.notify_one();
    }

    /// Park in the wait-set until notified, timed out, or interrupted,
    /// releasing ownership for the duration and re-acquiring before return.
    /// Caller must own the monitor.
    pub fn wait(
        &self,
        thread: &RuntimeThread,
        timeout: Option<std::time::Duration>,
        spin_limit: u32,
    ) -> WaitStatus {
        debug_assert_eq!(self.owner(), Owner::Thread(thread.id()));

        if thread.clear_interrupted() {
            return WaitStatus::Interrupted;
        }

        let node = Arc::new(WaitNode {
            thread: thread.id(),
            notified: AtomicBool::new(false),
        });
        self.wait_set.lock().push_back(node.clone());
        // The waiter keeps the monitor busy from here until it has fully
        // re-acquired; a monitor with waiters is never deflated
        self.waiters.fetch_add(1, Ordering::SeqCst);

        let saved_recursion = self.recursion.swap(0, Ordering::Relaxed);
        thread.set_parked_on(self.id);
        self.release();

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut status: Option<WaitStatus> = None;
        {
            let mut guard = self.wait_lock.lock();
            loop {
                if node.notified.load(Ordering::SeqCst) {
                    status = Some(WaitStatus::Notified);
                    break;
                }
                if thread.is_interrupted() {
                    break;
                }
                match deadline {
                    Some(d) => {
                        if Instant::now() >= d {
                            break;
                        }
                        self.wait_cv.wait_until(&mut guard, d);
                    }
                    None => self.wait_cv.wait(&mut guard),
                }
            }
        }
        thread.clear_parked_on();

        // Settle the final status under the wait-set lock: a notify racing
        // with timeout or interrupt wins, matching the transfer semantics
        {
            let mut ws = self.wait_set.lock();
            if let Some(pos) = ws.iter().position(|n| Arc::ptr_eq(n, &node)) {
                ws.remove(pos);
            }
            if status.is_none() {
                status = Some(if node.notified.load(Ordering::SeqCst) {
                    WaitStatus::Notified
                } else if thread.clear_interrupted() {
                    WaitStatus::Interrupted
                } else {
                    WaitStatus::TimedOut
                });
            }
        }

        // Re-acquire. waiters > 0 guarantees the monitor outlives this loop.
        loop {
            match self.enter(thread.id(), spin_limit) {
                EnterOutcome::Entered => break,
                EnterOutcome::Deflated => std::thread::yield_now(),
            }
        }
        self.recursion.store(saved_recursion, Ordering::Relaxed);
        self.waiters.fetch_sub(1, Ordering::SeqCst);

        status.unwrap_or(WaitStatus::Notified)
    }

    /// Mark waiters as transferred to the entry set. Caller must own the
    /// monitor. Returns the number of threads notified.
    pub fn notify(&self, all: bool) -> usize {
        let mut n = 0;
        {
            let ws = self.wait_set.lock();
            for node in ws.iter() {
                if !node.notified.load(Ordering::SeqCst) {
                    node.notified.store(true, Ordering::SeqCst);
                    n += 1;
                    if !all {
                        break;
                    }
                }
            }
        }
        if n > 0 {
            let _guard = self.wait_lock.lock();
            self.wait_cv.notify_all();
        }
        n
    }

    /// Wake a parked waiter so it can observe its interrupt flag
    pub fn interrupt_kick(&self) {
        let _guard = self.wait_lock.lock();
        self.wait_cv.notify_all();
    }

    /// Coordinator-side deflation claim. On success the monitor is flagged
    /// `deflating` and guaranteed free of owners, waiters, and entrants;
    /// the caller then detaches it from the object and the table.
    pub fn try_deflate(&self) -> bool {
        if self.deflating.load(Ordering::SeqCst) {
            return false;
        }
        if self.waiters() > 0 {
            return false;
        }
        if !self.cas_owner(Owner::None, Owner::Deflater) {
            return false;
        }
        if self.waiters() > 0 || self.contentions() > 0 {
            self.abort_deflate();
            return false;
        }
        self.deflating.store(true, Ordering::SeqCst);
        if self.contentions() > 0 {
            // An entrant pinned after our first check; it will observe the
            // flag, but losing to it here is the cheaper resolution
            self.deflating.store(false, Ordering::SeqCst);
            self.abort_deflate();
            return false;
        }
        true
    }

    fn abort_deflate(&self) {
        self.owner.store(OWNER_NONE, Ordering::SeqCst);
        let _guard = self.entry_lock.lock();
        self.entry_cv.notify_all();
    }

    /// Exit-side speculative deflation: the owner, holding an uncontended
    /// monitor at recursion zero, claims it for immediate reclamation.
    pub fn try_deflate_on_exit(&self, tid: ThreadId) -> bool {
        debug_assert_eq!(self.owner(), Owner::Thread(tid));
        if self.recursion() != 0 || self.waiters() > 0 {
            return false;
        }
        if self
            .deflating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        // Our own pin is not active here: the engine exit path holds no pin
        // while the caller owns the lock. Any value above zero is a real
        // contender.
        if self.contentions() > 0 || self.waiters() > 0 {
            self.deflating.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Called after a successful exit-side deflation once the object header
    /// and association have been detached
    pub fn finish_deflate_on_exit(&self) {
        self.owner.store(OWNER_DEFLATER, Ordering::SeqCst);
        let _guard = self.entry_lock.lock();
        self.entry_cv.notify_all();
    }

    /// Diagnostic view of the wait-set
    pub fn waiting_threads(&self) -> Vec<ThreadId> {
        self.wait_set.lock().iter().map(|n| n.thread).collect()
    }
}
