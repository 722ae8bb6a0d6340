/*!
 * Locking Protocol Engine
 *
 * The state machine governing enter/exit/wait/notify across the three
 * locking tiers, including inflation and the engine half of deflation.
 *
 * Per-object states are UNLOCKED, LOCKED_BY_STACK, INFLATING (transient,
 * legacy inflation only), and MONITOR. The tier is fixed at construction;
 * engine code reads the selector once and never attempts to recover from a
 * "wrong tier" situation - that would be a bug in the runtime itself.
 *
 * Monitor resolution always follows pin-then-validate: raise the monitor's
 * pin count, then check the deflation flag and the object identity. The
 * deflater orders its checks the other way around (flag, then pins), so
 * under sequentially consistent ordering exactly one side backs off.
 */

use crate::core::errors::{Result, SyncError, WaitStatus};
use crate::core::types::{HashCode, InflationCause, ThreadId};
use crate::runtime::object::Obj;
use crate::runtime::thread::{RuntimeThread, ThreadRegistry};
use crate::sync::arena::{MonitorArena, PinnedMonitor};
use crate::sync::backoff::{Backoff, InflationStripes};
use crate::sync::config::{LockingMode, SyncConfig, ValueBasedPolicy};
use crate::sync::hash::HashGenerator;
use crate::sync::header::{HeaderState, MarkWord};
use crate::sync::monitor::{EnterOutcome, ObjectMonitor, Owner};
use crate::sync::record::{
    record_key, record_key_slot, record_key_thread, DISPLACED_MONITOR_LEVEL, DISPLACED_RECURSIVE,
};
use crate::sync::registry::InUseRegistry;
use crate::sync::stats::SyncStats;
use crate::sync::table::AssociationTable;
use log::{debug, trace, warn};
use std::sync::Arc;
use std::time::Duration;

pub struct ObjectSynchronizer {
    mode: LockingMode,
    config: SyncConfig,
    threads: Arc<ThreadRegistry>,
    arena: Arc<MonitorArena>,
    registry: Arc<InUseRegistry>,
    table: Arc<AssociationTable>,
    hasher: HashGenerator,
    stripes: InflationStripes,
    stats: Arc<SyncStats>,
}

impl ObjectSynchronizer {
    pub fn new(config: SyncConfig, threads: Arc<ThreadRegistry>) -> Self {
        let arena = Arc::new(MonitorArena::new());
        let registry = Arc::new(InUseRegistry::new(arena.clone()));
        let table = Arc::new(AssociationTable::new(arena.clone()));
        let hasher = HashGenerator::new(config.hash_algorithm);
        debug!("object synchronizer initialized in {:?} mode", config.mode);
        Self {
            mode: config.mode,
            hasher,
            config,
            threads,
            arena,
            registry,
            table,
            stripes: InflationStripes::new(),
            stats: Arc::new(SyncStats::new()),
        }
    }

    #[inline]
    pub fn mode(&self) -> LockingMode {
        self.mode
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn arena(&self) -> &Arc<MonitorArena> {
        &self.arena
    }

    pub fn registry(&self) -> &Arc<InUseRegistry> {
        &self.registry
    }

    pub fn table(&self) -> &Arc<AssociationTable> {
        &self.table
    }

    pub fn stats(&self) -> &Arc<SyncStats> {
        &self.stats
    }

    fn ims(what: &str) -> SyncError {
        SyncError::IllegalMonitorState(what.to_string())
    }

    // =========================================================================
    // ENTER / EXIT
    // =========================================================================

    /// Acquire the object's lock, blocking on contention. The calling
    /// thread's held-lock count is incremented exactly once.
    pub fn enter(&self, obj: &Obj, thread: &RuntimeThread) {
        if obj.is_value_based() {
            self.value_based_hit(obj, thread);
        }
        match self.mode {
            LockingMode::LightWeight => self.enter_lightweight(obj, thread),
            LockingMode::Legacy => self.enter_legacy(obj, thread),
            LockingMode::HeavyweightOnly => self.enter_heavyweight(obj, thread),
        }
        thread.inc_held();
    }

    /// Release one level of the object's lock
    pub fn exit(&self, obj: &Obj, thread: &RuntimeThread) -> Result<()> {
        // Held count drops before the per-tier work; handshake bookkeeping
        // relies on this ordering
        thread.dec_held();
        let result = match self.mode {
            LockingMode::LightWeight => self.exit_lightweight(obj, thread),
            LockingMode::Legacy => self.exit_legacy(obj, thread),
            LockingMode::HeavyweightOnly => self.exit_heavyweight(obj, thread),
        };
        if result.is_err() {
            thread.inc_held();
        }
        result
    }

    fn value_based_hit(&self, obj: &Obj, thread: &RuntimeThread) {
        self.stats.record_value_based_hit();
        match self.config.value_based_policy {
            ValueBasedPolicy::Off => {}
            ValueBasedPolicy::Warn => {
                warn!(
                    "thread {} synchronizes on value-based object {}",
                    thread.id(),
                    obj.id()
                );
            }
            ValueBasedPolicy::Fatal => {
                panic!("synchronization on value-based object {}", obj.id());
            }
        }
    }

    // ---- lightweight tier ----

    fn enter_lightweight(&self, obj: &Obj, thread: &RuntimeThread) {
        {
            let mut ls = thread.lock_stack();
            if ls.try_recursive_enter(obj) {
                return;
            }
            if ls.contains(obj) {
                // Recursive but buried below other entries: the fast path
                // cannot express this, take it through a monitor
                drop(ls);
                self.inflate_and_enter(obj, thread);
                return;
            }
            if ls.is_full() {
                let victim = ls.oldest();
                drop(ls);
                if let Some(victim) = victim {
                    self.stats.record_lock_stack_overflow();
                    self.inflate_held(&victim, thread);
                }
            }
        }

        let mut spins = self.config.enter_spin_limit;
        loop {
            let mark = obj.header().load();
            if mark.is_neutral() {
                if obj.header().cas(mark, mark.set_fast_locked()).is_ok() {
                    thread.lock_stack().push(obj.clone());
                    return;
                }
            } else if mark.has_monitor() || mark.is_being_inflated() || spins == 0 {
                break;
            }
            if spins == 0 {
                break;
            }
            spins -= 1;
            std::hint::spin_loop();
        }
        self.inflate_and_enter(obj, thread);
    }

    /// Transfer a fast-locked object this thread owns into a monitor,
    /// freeing its lock-stack entry
    fn inflate_held(&self, obj: &Obj, thread: &RuntimeThread) {
        loop {
            let m = self.inflate(obj, thread, InflationCause::VmInternal);
            if self.claim_anonymous(&m, obj, thread) {
                thread.om_cache().insert(obj.id(), m.id());
                return;
            }
            if m.owner() == Owner::Thread(thread.id()) {
                return;
            }
            std::thread::yield_now();
        }
    }

    fn inflate_and_enter(&self, obj: &Obj, thread: &RuntimeThread) {
        let mut backoff = Backoff::new(
            &self.stripes,
            self.config.inflation_spin_limit,
            self.config.inflation_yield_limit,
        );
        loop {
            let m = self.inflate(obj, thread, InflationCause::MonitorEnter);
            if self.mode == LockingMode::LightWeight && thread.lock_stack().contains(obj) {
                // We hold the fast lock; the monitor owner is anonymous
                // until we claim it, and this enter adds one level
                if self.claim_anonymous(&m, obj, thread) {
                    m.set_recursion(m.recursion() + 1);
                    thread.om_cache().insert(obj.id(), m.id());
                    return;
                }
                backoff.pause(obj.id());
                continue;
            }
            match m.enter(thread.id(), self.config.enter_spin_limit) {
                EnterOutcome::Entered => {
                    if self.mode == LockingMode::LightWeight {
                        thread.om_cache().insert(obj.id(), m.id());
                    }
                    return;
                }
                EnterOutcome::Deflated => {
                    drop(m);
                    backoff.pause(obj.id());
                }
            }
        }
    }

    /// Resolve the anonymous owner to this thread, folding the lock-stack
    /// acquisitions into the monitor's recursion count
    fn claim_anonymous(&self, m: &ObjectMonitor, obj: &Obj, thread: &RuntimeThread) -> bool {
        let mut ls = thread.lock_stack();
        if !ls.contains(obj) {
            return false;
        }
        if m.cas_owner(Owner::Anonymous, Owner::Thread(thread.id())) {
            let count = ls.remove(obj);
            debug_assert!(count >= 1);
            m.set_recursion(count - 1);
            true
        } else {
            false
        }
    }

    fn exit_lightweight(&self, obj: &Obj, thread: &RuntimeThread) -> Result<()> {
        if thread.lock_stack().try_recursive_exit(obj) {
            return Ok(());
        }
        loop {
            let mark = obj.header().load();
            match mark.decode() {
                HeaderState::FastLocked { .. } => {
                    let raced = {
                        let mut ls = thread.lock_stack();
                        if !ls.contains(obj) {
                            return Err(Self::ims("exit of an object this thread does not lock"));
                        }
                        if ls.can_pop(obj) {
                            // Topmost single acquisition: plain fast unlock
                            if obj.header().cas(mark, mark.set_unlocked()).is_ok() {
                                let popped = ls.pop(obj);
                                debug_assert!(popped);
                                return Ok(());
                            }
                            // Inflated under us; retry through the monitor
                            true
                        } else {
                            false
                        }
                    };
                    if raced {
                        continue;
                    }
                    // Buried entry: force a monitor and release through it
                    let m = self.inflate(obj, thread, InflationCause::VmInternal);
                    if self.claim_anonymous(&m, obj, thread) {
                        m.exit(thread.id());
                        thread.om_cache().insert(obj.id(), m.id());
                        return Ok(());
                    }
                    std::thread::yield_now();
                }
                HeaderState::Monitor { .. } => {
                    let m = match self.lookup_lightweight(obj, thread) {
                        Some(m) => m,
                        None => {
                            // Association mid-deflation; the header settles shortly
                            std::thread::yield_now();
                            continue;
                        }
                    };
                    if thread.lock_stack().contains(obj) && !self.claim_anonymous(&m, obj, thread)
                    {
                        std::thread::yield_now();
                        continue;
                    }
                    match m.owner() {
                        Owner::Thread(t) if t == thread.id() => {
                            return self.monitor_exit_lightweight(obj, thread, m);
                        }
                        _ => {
                            return Err(Self::ims(
                                "exit of a monitor owned by another thread",
                            ))
                        }
                    }
                }
                HeaderState::Inflating => std::thread::yield_now(),
                HeaderState::Neutral { .. } => {
                    return Err(Self::ims("exit of an unlocked object"))
                }
            }
        }
    }

    fn monitor_exit_lightweight(
        &self,
        obj: &Obj,
        thread: &RuntimeThread,
        m: PinnedMonitor,
    ) -> Result<()> {
        // Speculative deflation on exit: an uncontended monitor at
        // recursion zero is downgraded back to a fast lock and the unlock
        // retried on the fast path
        if self.config.deflation.deflate_on_exit
            && m.recursion() == 0
            && m.waiters() == 0
            && !thread.lock_stack().is_full()
        {
            let handle = m.handle();
            drop(m); // our pin would read as contention
            if handle.try_deflate_on_exit(thread.id()) {
                self.table.remove(&handle);
                thread.om_cache().remove(obj.id());
                let mark = obj.header().load();
                debug_assert!(mark.has_monitor());
                let downgraded = mark.set_fast_locked();
                if obj.header().cas(mark, downgraded).is_ok() {
                    thread.lock_stack().push(obj.clone());
                    handle.finish_deflate_on_exit();
                    self.stripes.unpark_all(obj.id());
                    self.stats.record_deflate_on_exit();
                    trace!("monitor {} deflated on exit", handle.id());
                    return self.exit_lightweight(obj, thread);
                }
                // The header cannot move while we own the monitor and hold
                // the deflation flag
                log::error!(
                    "header of object {} changed during exit deflation",
                    obj.id()
                );
                handle.finish_deflate_on_exit();
                return Ok(());
            }
            handle.exit(thread.id());
            return Ok(());
        }
        m.exit(thread.id());
        Ok(())
    }

    // ---- legacy tier ----

    fn enter_legacy(&self, obj: &Obj, thread: &RuntimeThread) {
        let mut spins = self.config.enter_spin_limit;
        loop {
            let mark = obj.header().load();
            if mark.is_neutral() {
                let slot = thread.records().acquire(obj, mark.raw());
                let locked = MarkWord::with_locker(record_key(thread.id(), slot));
                if obj.header().cas(mark, locked).is_ok() {
                    return;
                }
                thread.records().release(slot);
            } else if let Some(key) = mark.locker_key() {
                if record_key_thread(key) == thread.id() {
                    // Recursive stack lock: a fresh record with the zero
                    // displaced-header sentinel, exit is then idempotent
                    thread.records().acquire(obj, DISPLACED_RECURSIVE);
                    return;
                }
                if spins == 0 {
                    break;
                }
            } else {
                break;
            }
            if spins == 0 {
                break;
            }
            spins -= 1;
            std::hint::spin_loop();
        }

        let mut backoff = Backoff::new(
            &self.stripes,
            self.config.inflation_spin_limit,
            self.config.inflation_yield_limit,
        );
        loop {
            let m = self.inflate(obj, thread, InflationCause::MonitorEnter);
            match m.enter(thread.id(), self.config.enter_spin_limit) {
                EnterOutcome::Entered => {
                    thread.records().acquire(obj, DISPLACED_MONITOR_LEVEL);
                    return;
                }
                EnterOutcome::Deflated => {
                    drop(m);
                    backoff.pause(obj.id());
                }
            }
        }
    }

    fn exit_legacy(&self, obj: &Obj, thread: &RuntimeThread) -> Result<()> {
        let Some((slot, displaced)) = thread.records().last_for(obj) else {
            return Err(Self::ims("exit of an object this thread does not lock"));
        };

        if displaced == DISPLACED_RECURSIVE {
            thread.records().release(slot);
            return Ok(());
        }

        if displaced == DISPLACED_MONITOR_LEVEL {
            let result = self.monitor_exit_via_header(obj, thread);
            if result.is_ok() {
                thread.records().release(slot);
            }
            return result;
        }

        // Outermost stack-lock level: restore the displaced header
        let locked = MarkWord::with_locker(record_key(thread.id(), slot));
        if obj
            .header()
            .cas(locked, MarkWord::from_raw(displaced))
            .is_ok()
        {
            thread.records().release(slot);
            return Ok(());
        }

        // Inflated while we held the stack lock; the inflater set us as the
        // monitor's owner
        let result = self.monitor_exit_via_header(obj, thread);
        if result.is_ok() {
            thread.records().release(slot);
        }
        result
    }

    fn monitor_exit_via_header(&self, obj: &Obj, thread: &RuntimeThread) -> Result<()> {
        loop {
            let mark = obj.header().load();
            match mark.decode() {
                HeaderState::Monitor { id } => {
                    let m = self.arena.get(id).pinned();
                    if m.is_deflating() || !m.guards(obj) {
                        std::thread::yield_now();
                        continue;
                    }
                    match m.owner() {
                        Owner::Thread(t) if t == thread.id() => {
                            m.exit(thread.id());
                            return Ok(());
                        }
                        _ => {
                            return Err(Self::ims(
                                "exit of a monitor owned by another thread",
                            ))
                        }
                    }
                }
                HeaderState::Inflating => std::thread::yield_now(),
                _ => return Err(Self::ims("exit of an unlocked object")),
            }
        }
    }

    // ---- heavyweight tier ----

    fn enter_heavyweight(&self, obj: &Obj, thread: &RuntimeThread) {
        let mut backoff = Backoff::new(
            &self.stripes,
            self.config.inflation_spin_limit,
            self.config.inflation_yield_limit,
        );
        loop {
            let m = self.inflate(obj, thread, InflationCause::MonitorEnter);
            match m.enter(thread.id(), self.config.enter_spin_limit) {
                EnterOutcome::Entered => return,
                EnterOutcome::Deflated => {
                    drop(m);
                    backoff.pause(obj.id());
                }
            }
        }
    }

    fn exit_heavyweight(&self, obj: &Obj, thread: &RuntimeThread) -> Result<()> {
        self.monitor_exit_via_header(obj, thread)
    }

    // =========================================================================
    // INFLATION
    // =========================================================================

    /// Promote the object to a heavyweight monitor (or find the existing
    /// one). The returned monitor is pinned and not deflating at return.
    /// `cause` is diagnostic only.
    pub fn inflate(&self, obj: &Obj, thread: &RuntimeThread, cause: InflationCause) -> PinnedMonitor {
        match self.mode {
            LockingMode::LightWeight => self.inflate_lightweight(obj, thread, cause),
            _ => self.inflate_with_header(obj, thread, cause),
        }
    }

    /// Lightweight tier: pinned lookup through the per-thread cache and the
    /// association table. `None` means "no live association right now".
    fn lookup_lightweight(&self, obj: &Obj, thread: &RuntimeThread) -> Option<PinnedMonitor> {
        {
            let cache = thread.om_cache();
            if let Some(mid) = cache.get(obj.id()) {
                let m = self.arena.get(mid).pinned();
                drop(cache);
                if !m.is_deflating() && m.guards(obj) {
                    return Some(m);
                }
                thread.om_cache().remove(obj.id());
            }
        }
        let m = self.table.get(obj)?.pinned();
        if m.is_deflating() || !m.guards(obj) {
            return None;
        }
        thread.om_cache().insert(obj.id(), m.id());
        Some(m)
    }

    fn inflate_lightweight(
        &self,
        obj: &Obj,
        thread: &RuntimeThread,
        cause: InflationCause,
    ) -> PinnedMonitor {
        let mut backoff = Backoff::new(
            &self.stripes,
            self.config.inflation_spin_limit,
            self.config.inflation_yield_limit,
        );
        loop {
            let mark = obj.header().load();
            if mark.has_monitor() {
                match self.lookup_lightweight(obj, thread) {
                    Some(m) => return m,
                    // Deflation is detaching the association; retry
                    None => {
                        backoff.pause(obj.id());
                        continue;
                    }
                }
            }
            if mark.is_being_inflated() {
                backoff.pause(obj.id());
                continue;
            }

            // The table key is the identity hash, so the hash must exist
            // before the association does
            self.ensure_header_hash(obj, thread);
            let mark = obj.header().load();
            if mark.has_monitor() || mark.is_being_inflated() {
                continue;
            }
            if self.table.get(obj).is_some() {
                // An association exists but the header has not caught up;
                // the winning inflator is mid-publish
                backoff.pause(obj.id());
                continue;
            }

            let candidate = self.arena.alloc().pinned();
            candidate.prepare(
                obj,
                MarkWord::neutral().copy_set_hash(mark.hash()),
                Owner::None,
            );
            let winner = self.table.insert_get(obj, &candidate.handle());
            if winner.id() != candidate.id() {
                // Racing inflator won; discard the speculative allocation
                // and wait for the winner to finish publishing - returning
                // it early would let a claim precede the header transition
                let loser_id = candidate.id();
                drop(candidate);
                self.arena.release(loser_id);
                backoff.pause(obj.id());
                continue;
            }

            // Registry publication is ordered before the header transition:
            // anyone who sees the monitor-tagged header finds the monitor
            // by traversal too
            self.registry.push(&candidate);
            self.publish_lightweight(obj, &candidate);
            self.stats.record_inflation(cause);
            trace!(
                "object {} inflated to monitor {} ({})",
                obj.id(),
                candidate.id(),
                cause.name()
            );
            return candidate;
        }
    }

    /// Flip the header to monitor-tagged, adjusting the monitor's owner to
    /// match what the header displaced: anonymous when the object was
    /// fast-locked, unowned when it was neutral
    fn publish_lightweight(&self, obj: &Obj, m: &ObjectMonitor) {
        loop {
            let mark = obj.header().load();
            if mark.has_monitor() {
                return;
            }
            if mark.is_being_inflated() {
                std::hint::spin_loop();
                continue;
            }
            if mark.is_fast_locked() {
                m.cas_owner(Owner::None, Owner::Anonymous);
            } else {
                m.cas_owner(Owner::Anonymous, Owner::None);
            }
            if obj.header().cas(mark, mark.set_has_monitor()).is_ok() {
                self.stripes.unpark_all(obj.id());
                return;
            }
        }
    }

    /// Legacy and heavyweight tiers: the header itself carries the monitor
    /// id; stack-locked objects go through the INFLATING sentinel while the
    /// displaced header is copied out of the locker's record
    fn inflate_with_header(
        &self,
        obj: &Obj,
        _thread: &RuntimeThread,
        cause: InflationCause,
    ) -> PinnedMonitor {
        let mut backoff = Backoff::new(
            &self.stripes,
            self.config.inflation_spin_limit,
            self.config.inflation_yield_limit,
        );
        loop {
            let mark = obj.header().load();
            match mark.decode() {
                HeaderState::Monitor { id } => {
                    // Pin, then validate both the deflation flag and the
                    // object identity: the slot may have been reclaimed and
                    // reissued since the header was read
                    let m = self.arena.get(id).pinned();
                    if m.is_deflating() || !m.guards(obj) {
                        drop(m);
                        backoff.pause(obj.id());
                        continue;
                    }
                    return m;
                }
                HeaderState::Inflating => {
                    backoff.pause(obj.id());
                }
                HeaderState::FastLocked { locker: Some(key) } => {
                    let m = self.arena.alloc().pinned();
                    if obj.header().cas(mark, MarkWord::inflating()).is_err() {
                        let id = m.id();
                        drop(m);
                        self.arena.release(id);
                        continue;
                    }
                    let owner_tid = record_key_thread(key);
                    let displaced = self
                        .threads
                        .get(owner_tid)
                        .and_then(|t| t.records().displaced(record_key_slot(key)));
                    let Some(displaced) = displaced else {
                        // The record vanished mid-inflation; revert and retry
                        obj.header().store(mark);
                        let id = m.id();
                        drop(m);
                        self.arena.release(id);
                        continue;
                    };
                    m.prepare(obj, MarkWord::from_raw(displaced), Owner::Thread(owner_tid));
                    self.registry.push(&m);
                    obj.header().store(MarkWord::with_monitor(m.id()));
                    self.stripes.unpark_all(obj.id());
                    self.stats.record_inflation(cause);
                    trace!(
                        "object {} inflated to monitor {} from stack lock ({})",
                        obj.id(),
                        m.id(),
                        cause.name()
                    );
                    return m;
                }
                HeaderState::Neutral { .. } => {
                    let m = self.arena.alloc().pinned();
                    m.prepare(obj, mark, Owner::None);
                    self.registry.push(&m);
                    if obj.header().cas(mark, MarkWord::with_monitor(m.id())).is_ok() {
                        self.stripes.unpark_all(obj.id());
                        self.stats.record_inflation(cause);
                        return m;
                    }
                    // Lost the publish race. The monitor is already in the
                    // registry, so flag it for the coordinator to reap.
                    let id = m.id();
                    drop(m);
                    self.reap_unpublished(&self.arena.get(id));
                    continue;
                }
                HeaderState::FastLocked { locker: None } => {
                    // Lightweight-style word in a header-embedding tier:
                    // impossible by construction
                    debug_assert!(false, "lightweight lock word in header-embedding tier");
                    backoff.pause(obj.id());
                }
            }
        }
    }

    // =========================================================================
    // WAIT / NOTIFY
    // =========================================================================

    /// Park the calling thread in the object's wait-set. `millis == 0`
    /// waits indefinitely; negative timeouts are a contract violation.
    /// Always inflates.
    pub fn wait(&self, obj: &Obj, thread: &RuntimeThread, millis: i64) -> Result<WaitStatus> {
        if millis < 0 {
            return Err(SyncError::InvalidTimeout(millis));
        }
        loop {
            let m = self.inflate(obj, thread, InflationCause::Wait);
            if self.mode == LockingMode::LightWeight
                && thread.lock_stack().contains(obj)
                && !self.claim_anonymous(&m, obj, thread)
            {
                std::thread::yield_now();
                continue;
            }
            if m.owner() != Owner::Thread(thread.id()) {
                return Err(Self::ims("wait requires the object's lock"));
            }
            let timeout = if millis == 0 {
                None
            } else {
                Some(Duration::from_millis(millis as u64))
            };
            return Ok(m.wait(thread, timeout, self.config.enter_spin_limit));
        }
    }

    pub fn notify(&self, obj: &Obj, thread: &RuntimeThread) -> Result<usize> {
        self.notify_with(obj, thread, false)
    }

    pub fn notify_all(&self, obj: &Obj, thread: &RuntimeThread) -> Result<usize> {
        self.notify_with(obj, thread, true)
    }

    /// No-inflation notify fast path: an object that is merely fast/stack
    /// locked by the caller was never inflated and cannot have waiters, so
    /// the notification is a no-op. Returns true when it applied.
    pub fn quick_notify(&self, obj: &Obj, thread: &RuntimeThread) -> bool {
        let mark = obj.header().load();
        if !mark.is_fast_locked() {
            return false;
        }
        match self.mode {
            LockingMode::LightWeight => thread.lock_stack().contains(obj),
            _ => mark
                .locker_key()
                .map(|key| record_key_thread(key) == thread.id())
                .unwrap_or(false),
        }
    }

    /// Wake waiters; `quick_notify` handles the never-inflated case first
    fn notify_with(&self, obj: &Obj, thread: &RuntimeThread, all: bool) -> Result<usize> {
        if self.quick_notify(obj, thread) {
            return Ok(0);
        }
        loop {
            let mark = obj.header().load();
            match mark.decode() {
                HeaderState::FastLocked { locker } => {
                    let owned = match self.mode {
                        LockingMode::LightWeight => thread.lock_stack().contains(obj),
                        _ => locker
                            .map(|key| record_key_thread(key) == thread.id())
                            .unwrap_or(false),
                    };
                    return if owned {
                        Ok(0)
                    } else {
                        Err(Self::ims("notify requires the object's lock"))
                    };
                }
                HeaderState::Monitor { id } => {
                    let m = match self.mode {
                        LockingMode::LightWeight => match self.lookup_lightweight(obj, thread) {
                            Some(m) => m,
                            None => {
                                std::thread::yield_now();
                                continue;
                            }
                        },
                        _ => {
                            let m = self.arena.get(id).pinned();
                            if m.is_deflating() || !m.guards(obj) {
                                std::thread::yield_now();
                                continue;
                            }
                            m
                        }
                    };
                    if self.mode == LockingMode::LightWeight
                        && thread.lock_stack().contains(obj)
                        && !self.claim_anonymous(&m, obj, thread)
                    {
                        std::thread::yield_now();
                        continue;
                    }
                    return if m.owner() == Owner::Thread(thread.id()) {
                        Ok(m.notify(all))
                    } else {
                        Err(Self::ims("notify requires the object's lock"))
                    };
                }
                HeaderState::Inflating => std::thread::yield_now(),
                HeaderState::Neutral { .. } => {
                    return Err(Self::ims("notify requires the object's lock"))
                }
            }
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn holds_lock(&self, thread: &RuntimeThread, obj: &Obj) -> bool {
        let mark = obj.header().load();
        match mark.decode() {
            HeaderState::FastLocked { locker } => match self.mode {
                LockingMode::LightWeight => thread.lock_stack().contains(obj),
                _ => locker
                    .map(|key| record_key_thread(key) == thread.id())
                    .unwrap_or(false),
            },
            HeaderState::Monitor { id } => {
                let m = match self.mode {
                    LockingMode::LightWeight => match self.table.get(obj) {
                        Some(m) => m,
                        None => return false,
                    },
                    _ => self.arena.get(id),
                };
                if !m.guards(obj) {
                    return false;
                }
                match m.owner() {
                    Owner::Thread(t) => t == thread.id(),
                    Owner::Anonymous => thread.lock_stack().contains(obj),
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// The thread currently holding the object's lock, if any
    pub fn lock_owner(&self, obj: &Obj) -> Option<ThreadId> {
        let mark = obj.header().load();
        match mark.decode() {
            HeaderState::FastLocked { locker: Some(key) } => Some(record_key_thread(key)),
            HeaderState::FastLocked { locker: None } => self.scan_lock_stacks(obj),
            HeaderState::Monitor { id } => {
                let m = match self.mode {
                    LockingMode::LightWeight => self.table.get(obj)?,
                    _ => self.arena.get(id),
                };
                if !m.guards(obj) {
                    return None;
                }
                match m.owner() {
                    Owner::Thread(t) => Some(t),
                    Owner::Anonymous => self.scan_lock_stacks(obj),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn scan_lock_stacks(&self, obj: &Obj) -> Option<ThreadId> {
        let mut owner = None;
        self.threads.for_each(|t| {
            if owner.is_none() && t.lock_stack().contains(obj) {
                owner = Some(t.id());
            }
        });
        owner
    }

    // =========================================================================
    // IDENTITY HASH
    // =========================================================================

    /// The object's stable identity hash, installing one on first use.
    /// Stable across lock/unlock/inflate/deflate cycles and concurrent
    /// callers.
    pub fn fast_hash_code(&self, thread: &RuntimeThread, obj: &Obj) -> HashCode {
        if self.mode == LockingMode::LightWeight {
            // Every header tag preserves the hash field in this tier
            return self.ensure_header_hash(obj, thread);
        }
        loop {
            let mark = obj.header().load();
            match mark.decode() {
                HeaderState::Neutral { hash } => {
                    if hash != 0 {
                        return hash;
                    }
                    let h = self.hasher.next_hash(thread, obj);
                    if obj.header().cas(mark, mark.copy_set_hash(h)).is_ok() {
                        self.stats.record_hash_install();
                        return h;
                    }
                }
                HeaderState::Monitor { id } => {
                    let m = self.arena.get(id).pinned();
                    if m.is_deflating() || !m.guards(obj) {
                        drop(m);
                        std::thread::yield_now();
                        continue;
                    }
                    let stored = m.header().load();
                    if stored.has_hash() {
                        return stored.hash();
                    }
                    let h = self.hasher.next_hash(thread, obj);
                    if m.header().cas(stored, stored.copy_set_hash(h)).is_ok() {
                        // A deflation racing with the install may have
                        // restored the header without our hash; retry if so
                        if m.is_deflating() {
                            drop(m);
                            std::thread::yield_now();
                            continue;
                        }
                        self.stats.record_hash_install();
                        return h;
                    }
                }
                HeaderState::FastLocked { .. } => {
                    // Stack-locked: the displaced header lives in a record;
                    // inflating moves it somewhere stable to hash against
                    let _m = self.inflate(obj, thread, InflationCause::HashCode);
                }
                HeaderState::Inflating => std::thread::yield_now(),
            }
        }
    }

    /// Lightweight tier: install the hash directly in the header,
    /// whatever the current tag
    fn ensure_header_hash(&self, obj: &Obj, thread: &RuntimeThread) -> HashCode {
        loop {
            let mark = obj.header().load();
            if mark.has_hash() {
                return mark.hash();
            }
            if mark.is_being_inflated() {
                std::thread::yield_now();
                continue;
            }
            let h = self.hasher.next_hash(thread, obj);
            if obj.header().cas(mark, mark.copy_set_hash(h)).is_ok() {
                self.stats.record_hash_install();
                return h;
            }
        }
    }

    // =========================================================================
    // DEFLATION SUPPORT
    // =========================================================================

    /// Detach a monitor the deflater has claimed: restore the object's
    /// header and drop the table association. The monitor stays flagged
    /// and registry-linked until the coordinator unlinks and recycles it.
    pub fn finish_deflation(&self, m: &ObjectMonitor) {
        debug_assert!(m.is_deflating());
        if self.mode == LockingMode::LightWeight {
            self.table.remove(m);
        }
        if let Some(obj) = m.object() {
            let restored = m.header().load().set_unlocked();
            let expected = match self.mode {
                LockingMode::LightWeight => restored.set_has_monitor(),
                _ => MarkWord::with_monitor(m.id()),
            };
            match obj.header().cas(expected, restored) {
                Ok(()) => {
                    self.stripes.unpark_all(obj.id());
                    trace!("object {} deflated from monitor {}", obj.id(), m.id());
                }
                Err(found) => {
                    // The monitor was never published (a lost inflation
                    // race); nothing to restore
                    debug_assert!(found.monitor_id() != Some(m.id()) || !found.has_monitor());
                }
            }
        }
    }

    /// Mark a monitor that lost its publish race so the coordinator reaps
    /// it on the next cycle
    fn reap_unpublished(&self, m: &ObjectMonitor) {
        if m.try_deflate() {
            self.finish_deflation(m);
        }
    }

    // =========================================================================
    // THREAD TEARDOWN / INTERRUPTION
    // =========================================================================

    /// Set the thread's interrupt status and kick any wait it is parked in
    pub fn interrupt(&self, thread: &RuntimeThread) {
        thread.interrupt();
        if let Some(mid) = thread.parked_on() {
            // A stale id after wake-up at worst causes a spurious kick
            self.arena.get(mid).interrupt_kick();
        }
    }

    /// Release everything the thread still holds; called during thread
    /// teardown. Abandoned locks are logged - a torn-down thread holding
    /// monitors is a runtime bug, but leaking them would be worse.
    pub fn release_owned_monitors(&self, thread: &RuntimeThread) {
        if self.mode == LockingMode::LightWeight {
            let entries = thread.lock_stack().drain();
            for (obj, _count) in entries {
                warn!(
                    "thread {} exiting with object {} fast-locked",
                    thread.id(),
                    obj.id()
                );
                loop {
                    let mark = obj.header().load();
                    if mark.is_fast_locked() {
                        if obj.header().cas(mark, mark.set_unlocked()).is_ok() {
                            break;
                        }
                    } else if mark.has_monitor() {
                        match self.table.get(&obj) {
                            Some(m) => {
                                let m = m.pinned();
                                if m.is_deflating() {
                                    std::thread::yield_now();
                                    continue;
                                }
                                if m.cas_owner(Owner::Anonymous, Owner::Thread(thread.id()))
                                    || m.owner() == Owner::Thread(thread.id())
                                {
                                    m.set_recursion(0);
                                    m.exit(thread.id());
                                }
                                break;
                            }
                            None => std::thread::yield_now(),
                        }
                    } else {
                        break;
                    }
                }
            }
            thread.om_cache().clear();
        }

        if self.mode == LockingMode::Legacy {
            for (obj, displaced) in thread.records().drain() {
                if displaced == DISPLACED_RECURSIVE || displaced == DISPLACED_MONITOR_LEVEL {
                    continue;
                }
                let mark = obj.header().load();
                if let Some(key) = mark.locker_key() {
                    if record_key_thread(key) == thread.id() {
                        warn!(
                            "thread {} exiting with object {} stack-locked",
                            thread.id(),
                            obj.id()
                        );
                        let _ = obj.header().cas(mark, MarkWord::from_raw(displaced));
                    }
                }
            }
        }

        self.registry.for_each(|m| {
            if m.owner() == Owner::Thread(thread.id()) {
                warn!(
                    "releasing monitor {} held by exiting thread {}",
                    m.id(),
                    thread.id()
                );
                m.set_recursion(0);
                m.exit(thread.id());
            }
            true
        });
    }
}
