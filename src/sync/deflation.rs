/*!
 * Deflation Coordinator
 *
 * Asynchronous reclamation of idle monitors. A dedicated background thread
 * periodically walks the in-use registry, claims monitors that are not
 * busy, detaches them from their objects, unlinks them in batches, and -
 * only after a cooperative rendezvous with every attached thread has
 * cleared the per-thread lookup caches - recycles their slots.
 *
 * The whole protocol is advisory: it never fails, it only skips. A monitor
 * that finds new contention mid-deflation loses the race gracefully and
 * the contender retries against the restored header.
 */

use crate::core::types::{MonitorId, ThreadId};
use crate::runtime::handshake::HandshakeExecutor;
use crate::sync::config::DeflationConfig;
use crate::sync::engine::ObjectSynchronizer;
use crate::sync::monitor::Owner;
use ahash::HashMap;
use log::{debug, info, trace};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Why a deflation cycle ran. Guaranteed-interval cycles are excluded from
/// no-progress accounting: they are expected to be commonly unproductive
/// and must not escalate the threshold heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeflationReason {
    /// `request_deflation` was called
    Explicit,
    /// In-use monitors crossed the ceiling percentage
    Threshold,
    /// The hard upper bound on time between cycles elapsed
    Guaranteed,
    /// Final audit cycle at shutdown
    Shutdown,
}

struct TimerState {
    last_cycle: Instant,
}

pub struct DeflationCoordinator {
    engine: Arc<ObjectSynchronizer>,
    handshake: Arc<dyn HandshakeExecutor>,
    config: DeflationConfig,
    timer: Mutex<TimerState>,
    wakeup: Condvar,
    done: Condvar,
    request: AtomicBool,
    shutdown: AtomicBool,
    /// Dynamic in-use ceiling: grows with thread count, shrinks as threads
    /// exit, force-bumped when the heuristic itself stops making progress
    ceiling: AtomicUsize,
    no_progress: AtomicU32,
    cycles: AtomicU64,
}

impl DeflationCoordinator {
    pub fn new(
        engine: Arc<ObjectSynchronizer>,
        config: DeflationConfig,
        handshake: Arc<dyn HandshakeExecutor>,
    ) -> Self {
        let ceiling = config.ceiling_base;
        Self {
            engine,
            handshake,
            config,
            timer: Mutex::new(TimerState {
                last_cycle: Instant::now(),
            }),
            wakeup: Condvar::new(),
            done: Condvar::new(),
            request: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            ceiling: AtomicUsize::new(ceiling),
            no_progress: AtomicU32::new(0),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling.load(Ordering::Relaxed)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Ceiling bookkeeping on thread attach
    pub fn thread_attached(&self) {
        self.ceiling
            .fetch_add(self.config.per_thread_estimate, Ordering::Relaxed);
    }

    /// Ceiling bookkeeping on thread detach; never drops below the base
    pub fn thread_detached(&self) {
        let per_thread = self.config.per_thread_estimate;
        let base = self.config.ceiling_base;
        let mut current = self.ceiling.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(per_thread).max(base);
            match self.ceiling.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(found) => current = found,
            }
        }
    }

    /// Evaluate the trigger conditions
    fn should_deflate(&self) -> Option<DeflationReason> {
        if self.request.swap(false, Ordering::SeqCst) {
            return Some(DeflationReason::Explicit);
        }
        let elapsed = self.timer.lock().last_cycle.elapsed();
        if let Some(guaranteed) = self.config.guaranteed_interval {
            if elapsed >= guaranteed {
                return Some(DeflationReason::Guaranteed);
            }
        }
        if self.config.threshold_percent > 0 && elapsed >= self.config.min_interval {
            let in_use = self.engine.registry().count();
            let ceiling = self.ceiling.load(Ordering::Relaxed);
            if in_use * 100 >= ceiling * self.config.threshold_percent as usize {
                return Some(DeflationReason::Threshold);
            }
        }
        None
    }

    /// One full deflation cycle. Returns the number of monitors reclaimed.
    pub fn run_cycle(&self, reason: DeflationReason) -> usize {
        self.run_cycle_with_report(reason, None)
    }

    /// As `run_cycle`; when `undeflatable` is given, monitors that were
    /// skipped because a thread owns them are reported keyed by owner.
    pub fn run_cycle_with_report(
        &self,
        reason: DeflationReason,
        mut undeflatable: Option<&mut HashMap<ThreadId, Vec<MonitorId>>>,
    ) -> usize {
        let start = Instant::now();
        let stats = self.engine.stats().clone();

        // Phase 1: claim idle monitors and detach them from their objects
        let mut marked = 0usize;
        let batch_max = self.config.batch_max;
        self.engine.registry().for_each(|m| {
            if marked >= batch_max {
                return false;
            }
            if m.try_deflate() {
                // try_deflate left the owner at Deflater, which is what
                // makes the monitor reclaimable once detached
                self.engine.finish_deflation(m);
                marked += 1;
            } else if let Some(report) = undeflatable.as_deref_mut() {
                if let Owner::Thread(tid) = m.owner() {
                    report.entry(tid).or_default().push(m.id());
                }
            }
            true
        });

        // Phase 2: unlink everything reclaimable, including monitors
        // deflated on exit since the previous cycle
        let mut reclaimed: Vec<MonitorId> = Vec::new();
        let handshake = self.handshake.clone();
        let mut poll = || {
            if handshake.has_pending() {
                std::thread::yield_now();
            }
        };
        let unlinked =
            self.engine
                .registry()
                .unlink_deflated(batch_max, &mut poll, &mut reclaimed);

        // Phase 3: one global rendezvous so no thread can still reach a
        // monitor we are about to recycle through its lookup cache
        if unlinked > 0 || reason == DeflationReason::Shutdown {
            self.handshake.execute("monitor-deflation", &mut |thread| {
                thread.om_cache().clear();
            });
        }

        // Phase 4: recycle only after the rendezvous
        for &id in &reclaimed {
            trace!("recycling monitor {}", id);
            self.engine.arena().release(id);
        }

        // Phase 5: progress accounting
        stats.record_cycle();
        stats.record_deflations(unlinked as u64);
        if unlinked == 0 {
            let exempt = matches!(
                reason,
                DeflationReason::Guaranteed | DeflationReason::Shutdown
            );
            if !exempt {
                stats.record_no_progress();
                let strikes = self.no_progress.fetch_add(1, Ordering::Relaxed) + 1;
                if strikes >= self.config.no_progress_bump_after {
                    self.no_progress.store(0, Ordering::Relaxed);
                    let old = self.ceiling.fetch_add(
                        self.ceiling.load(Ordering::Relaxed),
                        Ordering::Relaxed,
                    );
                    stats.record_ceiling_bump();
                    info!(
                        "deflation made no progress {} times; ceiling bumped {} -> {}",
                        strikes,
                        old,
                        old * 2
                    );
                }
            }
        } else {
            self.no_progress.store(0, Ordering::Relaxed);
        }

        {
            let mut timer = self.timer.lock();
            timer.last_cycle = Instant::now();
            self.cycles.fetch_add(1, Ordering::SeqCst);
            self.done.notify_all();
        }

        debug!(
            "deflation cycle ({:?}): marked {}, reclaimed {} in {:?}; {} in use",
            reason,
            marked,
            unlinked,
            start.elapsed(),
            self.engine.registry().count()
        );
        unlinked
    }

    /// Request an asynchronous cycle and wait for it to finish.
    /// Returns whether a cycle completed within the timeout.
    pub fn request_deflation(&self, timeout: Duration) -> bool {
        let observed = self.cycles.load(Ordering::SeqCst);
        self.request.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + timeout;
        let mut timer = self.timer.lock();
        self.wakeup.notify_all();
        while self.cycles.load(Ordering::SeqCst) == observed {
            if self.done.wait_until(&mut timer, deadline).timed_out() {
                return self.cycles.load(Ordering::SeqCst) != observed;
            }
        }
        true
    }

    /// Background loop body; runs until `stop` is called, then performs
    /// the final shutdown audit
    fn run_loop(&self) {
        debug!("deflation coordinator thread started");
        loop {
            {
                let mut timer = self.timer.lock();
                if !self.shutdown.load(Ordering::SeqCst) && !self.request.load(Ordering::SeqCst) {
                    self.wakeup
                        .wait_for(&mut timer, self.config.check_interval);
                }
            }
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            if let Some(reason) = self.should_deflate() {
                self.run_cycle(reason);
            }
        }
        // Final audit: reclaim whatever is left and check the books
        self.run_cycle(DeflationReason::Shutdown);
        self.engine.registry().audit();
        debug!("deflation coordinator thread stopped");
    }

    pub fn spawn_background(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = self.clone();
        std::thread::Builder::new()
            .name("monitor-deflation".into())
            .spawn(move || coordinator.run_loop())
            .expect("failed to spawn deflation thread")
    }

    /// Ask the background loop to exit after a final audit cycle
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _timer = self.timer.lock();
        self.wakeup.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::InflationCause;
    use crate::runtime::handshake::ThreadListHandshake;
    use crate::runtime::object::RuntimeObject;
    use crate::runtime::thread::ThreadRegistry;
    use crate::sync::config::{LockingMode, SyncConfig};

    fn setup(mode: LockingMode) -> (Arc<ThreadRegistry>, Arc<ObjectSynchronizer>, DeflationCoordinator) {
        let threads = Arc::new(ThreadRegistry::new());
        let config = SyncConfig::foreground(mode);
        let engine = Arc::new(ObjectSynchronizer::new(config.clone(), threads.clone()));
        let handshake = Arc::new(ThreadListHandshake::new(threads.clone()));
        let coordinator =
            DeflationCoordinator::new(engine.clone(), config.deflation.clone(), handshake);
        (threads, engine, coordinator)
    }

    #[test]
    fn test_cycle_reclaims_idle_monitor() {
        let (threads, engine, coordinator) = setup(LockingMode::HeavyweightOnly);
        let thread = threads.attach("t");
        let obj = RuntimeObject::new();

        engine.enter(&obj, &thread);
        engine.exit(&obj, &thread).unwrap();
        assert_eq!(engine.registry().count(), 1);

        let reclaimed = coordinator.run_cycle(DeflationReason::Explicit);
        assert_eq!(reclaimed, 1);
        assert_eq!(engine.registry().count(), 0);
        assert!(obj.header().load().is_neutral());

        // The object is lockable again afterwards
        engine.enter(&obj, &thread);
        engine.exit(&obj, &thread).unwrap();
    }

    #[test]
    fn test_cycle_skips_owned_monitor() {
        let (threads, engine, coordinator) = setup(LockingMode::HeavyweightOnly);
        let thread = threads.attach("t");
        let obj = RuntimeObject::new();

        engine.enter(&obj, &thread);
        let mut report = HashMap::default();
        let reclaimed =
            coordinator.run_cycle_with_report(DeflationReason::Explicit, Some(&mut report));
        assert_eq!(reclaimed, 0);
        assert_eq!(engine.registry().count(), 1);
        let owned = report.get(&thread.id()).unwrap();
        assert_eq!(owned.len(), 1);

        engine.exit(&obj, &thread).unwrap();
    }

    #[test]
    fn test_no_progress_bumps_ceiling() {
        let (_threads, _engine, coordinator) = setup(LockingMode::HeavyweightOnly);
        let before = coordinator.ceiling();
        for _ in 0..coordinator.config.no_progress_bump_after {
            coordinator.run_cycle(DeflationReason::Threshold);
        }
        assert!(coordinator.ceiling() >= before * 2);
    }

    #[test]
    fn test_guaranteed_cycles_exempt_from_no_progress() {
        let (_threads, engine, coordinator) = setup(LockingMode::HeavyweightOnly);
        for _ in 0..5 {
            coordinator.run_cycle(DeflationReason::Guaranteed);
        }
        let snapshot = engine.stats().snapshot(0, 0);
        assert_eq!(snapshot.no_progress_cycles, 0);
        assert_eq!(snapshot.ceiling_bumps, 0);
    }

    #[test]
    fn test_ceiling_tracks_threads() {
        let (_threads, _engine, coordinator) = setup(LockingMode::LightWeight);
        let base = coordinator.ceiling();
        coordinator.thread_attached();
        coordinator.thread_attached();
        assert_eq!(
            coordinator.ceiling(),
            base + 2 * coordinator.config.per_thread_estimate
        );
        coordinator.thread_detached();
        coordinator.thread_detached();
        assert_eq!(coordinator.ceiling(), base);
    }
}
