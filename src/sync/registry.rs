/*!
 * In-Use Monitor Registry
 *
 * Lock-free singly-linked list of every live monitor, threaded through the
 * `next` link embedded in each monitor slot. Insertion is a CAS push on
 * the head and may race freely; removal is single-writer (the deflation
 * coordinator), batched, and required to poll for pending rendezvous
 * requests as it walks.
 *
 * Count and high-water-mark are advisory: races during concurrent
 * insertion and removal are tolerated and cross-checked by a one-shot
 * audit, not contractually exact at every instant.
 */

use crate::core::limits::UNLINK_POLL_INTERVAL;
use crate::core::types::{MonitorId, NO_MONITOR};
use crate::sync::arena::MonitorArena;
use crate::sync::monitor::ObjectMonitor;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

pub struct InUseRegistry {
    arena: Arc<MonitorArena>,
    head: AtomicU32,
    count: AtomicUsize,
    max: AtomicUsize,
    /// Serializes unlinking and full traversals; pushes stay lock-free
    remover: Mutex<()>,
}

impl InUseRegistry {
    pub fn new(arena: Arc<MonitorArena>) -> Self {
        Self {
            arena,
            head: AtomicU32::new(NO_MONITOR),
            count: AtomicUsize::new(0),
            max: AtomicUsize::new(0),
            remover: Mutex::new(()),
        }
    }

    /// Lock-free publication of a newly inflated monitor. Release-ordered,
    /// and called before the header CAS that makes the monitor reachable,
    /// so any thread that finds the monitor through the header also finds
    /// it through traversal.
    pub fn push(&self, monitor: &ObjectMonitor) {
        let id = monitor.id();
        loop {
            let head = self.head.load(Ordering::Acquire);
            monitor.set_next_link(head);
            if self
                .head
                .compare_exchange(head, id, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        let mut max = self.max.load(Ordering::Relaxed);
        while count > max {
            match self
                .max
                .compare_exchange_weak(max, count, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(found) => max = found,
            }
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::Relaxed)
    }

    /// Walk every registered monitor until `f` returns false. Serialized
    /// against unlinking; concurrent pushes may or may not be observed.
    pub fn for_each(&self, mut f: impl FnMut(&ObjectMonitor) -> bool) {
        let _guard = self.remover.lock();
        let mut cur = self.head.load(Ordering::Acquire);
        while cur != NO_MONITOR {
            let monitor = self.arena.get(cur);
            let next = monitor.next_link();
            if !f(&monitor) {
                break;
            }
            cur = next;
        }
    }

    /// Splice out contiguous runs of monitors flagged `deflating`, up to
    /// `max_batch`, appending their ids to `out`. Single-writer: only the
    /// deflation coordinator calls this.
    ///
    /// `poll` runs every `UNLINK_POLL_INTERVAL` visited nodes so the walk
    /// cooperates with a pending rendezvous instead of stalling it.
    pub fn unlink_deflated(
        &self,
        max_batch: usize,
        poll: &mut dyn FnMut(),
        out: &mut Vec<MonitorId>,
    ) -> usize {
        let _guard = self.remover.lock();
        let mut unlinked = 0;
        let mut visited = 0usize;

        // Strip deflating runs at the head first; pushes race with us here,
        // so the head itself moves only by CAS
        loop {
            let first = self.head.load(Ordering::Acquire);
            if first == NO_MONITOR || unlinked >= max_batch {
                break;
            }
            let monitor = self.arena.get(first);
            if !monitor.is_reclaimable() {
                break;
            }
            let (run, run_end) = self.collect_run(first, max_batch - unlinked);
            if self
                .head
                .compare_exchange(first, run_end, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                unlinked += run.len();
                self.count.fetch_sub(run.len(), Ordering::Relaxed);
                out.extend(run);
            }
            // On CAS failure a fresh monitor was pushed in front; it is not
            // deflating, so the loop exits and the run is handled below
        }

        // Interior runs: only this walk modifies interior links
        let mut prev = self.head.load(Ordering::Acquire);
        while prev != NO_MONITOR && unlinked < max_batch {
            let prev_monitor = self.arena.get(prev);
            let cur = prev_monitor.next_link();
            if cur == NO_MONITOR {
                break;
            }
            visited += 1;
            if visited % UNLINK_POLL_INTERVAL == 0 {
                poll();
            }
            let monitor = self.arena.get(cur);
            if monitor.is_reclaimable() {
                let (run, run_end) = self.collect_run(cur, max_batch - unlinked);
                prev_monitor.set_next_link(run_end);
                unlinked += run.len();
                self.count.fetch_sub(run.len(), Ordering::Relaxed);
                out.extend(run);
            } else {
                prev = cur;
            }
        }

        unlinked
    }

    fn collect_run(&self, start: MonitorId, limit: usize) -> (Vec<MonitorId>, MonitorId) {
        let mut run = vec![start];
        let mut end = self.arena.get(start).next_link();
        while end != NO_MONITOR && run.len() < limit {
            let monitor = self.arena.get(end);
            if !monitor.is_reclaimable() {
                break;
            }
            run.push(end);
            end = monitor.next_link();
        }
        (run, end)
    }

    /// One-shot consistency check of the advisory count against an actual
    /// traversal. Mismatches are logged, never fatal.
    pub fn audit(&self) -> bool {
        let mut walked = 0usize;
        self.for_each(|_| {
            walked += 1;
            true
        });
        let counted = self.count();
        if walked != counted {
            log::warn!(
                "in-use registry audit mismatch: walked {} monitors, counter says {}",
                walked,
                counted
            );
            false
        } else {
            log::debug!("in-use registry audit clean: {} monitors", walked);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<MonitorArena>, InUseRegistry) {
        let arena = Arc::new(MonitorArena::new());
        let registry = InUseRegistry::new(arena.clone());
        (arena, registry)
    }

    #[test]
    fn test_push_and_count() {
        let (arena, registry) = setup();
        let a = arena.alloc();
        let b = arena.alloc();
        registry.push(&a);
        registry.push(&b);
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.max(), 2);

        let mut seen = Vec::new();
        registry.for_each(|m| {
            seen.push(m.id());
            true
        });
        // LIFO order: most recent push first
        assert_eq!(seen, vec![b.id(), a.id()]);
    }

    #[test]
    fn test_unlink_deflated_splices_runs() {
        let (arena, registry) = setup();
        let monitors: Vec<_> = (0..6).map(|_| arena.alloc()).collect();
        for m in &monitors {
            registry.push(m);
        }
        // List order is reverse push order: m5 m4 m3 m2 m1 m0.
        // Mark m5 (head), m3, m2 (interior run), m0 (tail).
        assert!(monitors[5].try_deflate());
        assert!(monitors[3].try_deflate());
        assert!(monitors[2].try_deflate());
        assert!(monitors[0].try_deflate());

        let mut out = Vec::new();
        let mut polls = 0;
        let n = registry.unlink_deflated(64, &mut || polls += 1, &mut out);
        assert_eq!(n, 4);
        out.sort_unstable();
        let mut expected = vec![
            monitors[5].id(),
            monitors[3].id(),
            monitors[2].id(),
            monitors[0].id(),
        ];
        expected.sort_unstable();
        assert_eq!(out, expected);
        assert_eq!(registry.count(), 2);

        let mut remaining = Vec::new();
        registry.for_each(|m| {
            remaining.push(m.id());
            true
        });
        assert_eq!(remaining, vec![monitors[4].id(), monitors[1].id()]);
        assert!(registry.audit());
    }

    #[test]
    fn test_unlink_respects_batch_cap() {
        let (arena, registry) = setup();
        let monitors: Vec<_> = (0..5).map(|_| arena.alloc()).collect();
        for m in &monitors {
            registry.push(m);
            assert!(m.try_deflate());
        }
        let mut out = Vec::new();
        let n = registry.unlink_deflated(3, &mut || {}, &mut out);
        assert_eq!(n, 3);
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn test_concurrent_push() {
        use std::thread;
        let (arena, registry) = setup();
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let arena = arena.clone();
                let registry = registry.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        let m = arena.alloc();
                        registry.push(&m);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.count(), 400);
        assert!(registry.audit());
    }
}
