/*!
 * Mutual Exclusion Tests
 * Concurrent enter/exit correctness across every locking tier
 */

use objsync::{LockingMode, MonitorRuntime, RuntimeObject, SyncConfig};
use serial_test::serial;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

const WORKERS: usize = 8;
const ITERATIONS: usize = 2_000;

const ALL_MODES: [LockingMode; 3] = [
    LockingMode::LightWeight,
    LockingMode::Legacy,
    LockingMode::HeavyweightOnly,
];

// ============================================================================
// Mutual exclusion
// ============================================================================

#[test]
#[serial]
fn test_mutual_exclusion_under_contention() {
    for mode in ALL_MODES {
        let runtime = MonitorRuntime::initialize(SyncConfig::foreground(mode));
        let obj = RuntimeObject::new();
        let in_section = Arc::new(AtomicI32::new(0));
        let total = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..WORKERS)
            .map(|i| {
                let runtime = runtime.clone();
                let obj = obj.clone();
                let in_section = in_section.clone();
                let total = total.clone();
                thread::spawn(move || {
                    let me = runtime.attach_thread(format!("worker-{}", i));
                    for _ in 0..ITERATIONS {
                        runtime.enter(&obj, &me);
                        // The counter must never exceed 1 inside the section
                        let now = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                        assert_eq!(now, 1, "{:?}: {} threads inside critical section", mode, now);
                        total.fetch_add(1, Ordering::Relaxed);
                        in_section.fetch_sub(1, Ordering::SeqCst);
                        runtime.exit(&obj, &me).unwrap();
                    }
                    runtime.detach_thread(&me);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Counter returned to 0 between acquisitions and all work happened
        assert_eq!(in_section.load(Ordering::SeqCst), 0);
        assert_eq!(total.load(Ordering::Relaxed), (WORKERS * ITERATIONS) as u64);
        assert_eq!(runtime.lock_owner(&obj), None, "{:?}", mode);
    }
}

#[test]
#[serial]
fn test_many_objects_many_threads() {
    for mode in ALL_MODES {
        let runtime = MonitorRuntime::initialize(SyncConfig::foreground(mode));
        let objects: Arc<Vec<_>> = Arc::new((0..16).map(|_| RuntimeObject::new()).collect());

        let handles: Vec<_> = (0..WORKERS)
            .map(|i| {
                let runtime = runtime.clone();
                let objects = objects.clone();
                thread::spawn(move || {
                    let me = runtime.attach_thread(format!("worker-{}", i));
                    for step in 0..ITERATIONS {
                        let obj = &objects[(step * 7 + i) % objects.len()];
                        runtime.enter(obj, &me);
                        assert!(runtime.holds_lock(&me, obj));
                        runtime.exit(obj, &me).unwrap();
                    }
                    runtime.detach_thread(&me);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for obj in objects.iter() {
            assert_eq!(runtime.lock_owner(obj), None, "{:?}", mode);
        }
    }
}

// ============================================================================
// Recursion
// ============================================================================

#[test]
fn test_recursive_enter_requires_matching_exits() {
    for mode in ALL_MODES {
        let runtime = MonitorRuntime::initialize(SyncConfig::foreground(mode));
        let obj = RuntimeObject::new();
        let main = runtime.attach_thread("main");

        for depth in 1..=6u32 {
            for _ in 0..depth {
                runtime.enter(&obj, &main);
            }
            // k-1 exits must not release ownership
            for _ in 0..depth - 1 {
                runtime.exit(&obj, &main).unwrap();
                assert!(
                    runtime.holds_lock(&main, &obj),
                    "{:?}: lock released by an intermediate exit",
                    mode
                );
            }
            runtime.exit(&obj, &main).unwrap();
            assert!(!runtime.holds_lock(&main, &obj));
        }
        runtime.detach_thread(&main);
    }
}

#[test]
fn test_recursion_blocks_other_threads_until_last_exit() {
    for mode in ALL_MODES {
        let runtime = MonitorRuntime::initialize(SyncConfig::foreground(mode));
        let obj = RuntimeObject::new();
        let main = runtime.attach_thread("main");

        let depth = 4;
        for _ in 0..depth {
            runtime.enter(&obj, &main);
        }

        let acquired = Arc::new(AtomicI32::new(0));
        let contender = {
            let runtime = runtime.clone();
            let obj = obj.clone();
            let acquired = acquired.clone();
            thread::spawn(move || {
                let me = runtime.attach_thread("contender");
                runtime.enter(&obj, &me);
                acquired.store(1, Ordering::SeqCst);
                runtime.exit(&obj, &me).unwrap();
                runtime.detach_thread(&me);
            })
        };

        for _ in 0..depth - 1 {
            runtime.exit(&obj, &main).unwrap();
        }
        thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(
            acquired.load(Ordering::SeqCst),
            0,
            "{:?}: contender got the lock before the final exit",
            mode
        );

        runtime.exit(&obj, &main).unwrap();
        contender.join().unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        runtime.detach_thread(&main);
    }
}

// ============================================================================
// Nested distinct objects (lock-stack pressure in the lightweight tier)
// ============================================================================

#[test]
fn test_deeply_nested_distinct_objects() {
    for mode in ALL_MODES {
        let runtime = MonitorRuntime::initialize(SyncConfig::foreground(mode));
        let main = runtime.attach_thread("main");
        let objects: Vec<_> = (0..24).map(|_| RuntimeObject::new()).collect();

        for obj in &objects {
            runtime.enter(obj, &main);
        }
        for obj in &objects {
            assert!(runtime.holds_lock(&main, obj), "{:?}", mode);
            assert_eq!(runtime.lock_owner(obj), Some(main.id()));
        }
        // Release in reverse order
        for obj in objects.iter().rev() {
            runtime.exit(obj, &main).unwrap();
        }
        for obj in &objects {
            assert!(!runtime.holds_lock(&main, obj));
        }
        runtime.detach_thread(&main);
    }
}

#[test]
fn test_out_of_order_release() {
    for mode in ALL_MODES {
        let runtime = MonitorRuntime::initialize(SyncConfig::foreground(mode));
        let main = runtime.attach_thread("main");
        let a = RuntimeObject::new();
        let b = RuntimeObject::new();
        let c = RuntimeObject::new();

        runtime.enter(&a, &main);
        runtime.enter(&b, &main);
        runtime.enter(&c, &main);
        // Release the middle one first
        runtime.exit(&b, &main).unwrap();
        assert!(runtime.holds_lock(&main, &a));
        assert!(!runtime.holds_lock(&main, &b));
        assert!(runtime.holds_lock(&main, &c));
        runtime.exit(&a, &main).unwrap();
        runtime.exit(&c, &main).unwrap();
        runtime.detach_thread(&main);
    }
}
