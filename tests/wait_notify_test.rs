/*!
 * Wait/Notify Tests
 * Ordering, timeout, interruption, and illegal-state detection for the
 * wait-set protocol, across every locking tier
 */

use objsync::{LockingMode, MonitorRuntime, RuntimeObject, SyncConfig, SyncError, WaitStatus};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const ALL_MODES: [LockingMode; 3] = [
    LockingMode::LightWeight,
    LockingMode::Legacy,
    LockingMode::HeavyweightOnly,
];

// ============================================================================
// Notify wakes a waiter which then re-acquires
// ============================================================================

#[test]
fn test_notify_wakes_single_waiter() {
    for mode in ALL_MODES {
        let runtime = MonitorRuntime::initialize(SyncConfig::foreground(mode));
        let obj = RuntimeObject::new();
        let resumed = Arc::new(AtomicU32::new(0));

        let waiter = {
            let runtime = runtime.clone();
            let obj = obj.clone();
            let resumed = resumed.clone();
            thread::spawn(move || {
                let me = runtime.attach_thread("waiter");
                runtime.enter(&obj, &me);
                let status = runtime.wait(&obj, &me, 0).unwrap();
                assert_eq!(status, WaitStatus::Notified);
                // The lock is held again on return
                assert!(runtime.holds_lock(&me, &obj));
                resumed.store(1, Ordering::SeqCst);
                runtime.exit(&obj, &me).unwrap();
                runtime.detach_thread(&me);
            })
        };

        let main = runtime.attach_thread("main");
        // Keep notifying until the waiter has actually parked
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            thread::sleep(Duration::from_millis(20));
            runtime.enter(&obj, &main);
            let notified = runtime.notify(&obj, &main).unwrap();
            if notified == 1 {
                // Still owned here: the waiter cannot resume until we exit
                assert_eq!(resumed.load(Ordering::SeqCst), 0, "{:?}", mode);
                runtime.exit(&obj, &main).unwrap();
                break;
            }
            runtime.exit(&obj, &main).unwrap();
            assert!(Instant::now() < deadline, "{:?}: waiter never parked", mode);
        }

        waiter.join().unwrap();
        assert_eq!(resumed.load(Ordering::SeqCst), 1);
        runtime.detach_thread(&main);
    }
}

#[test]
fn test_notify_all_wakes_everyone() {
    for mode in ALL_MODES {
        let runtime = MonitorRuntime::initialize(SyncConfig::foreground(mode));
        let obj = RuntimeObject::new();
        let resumed = Arc::new(AtomicU32::new(0));
        let waiter_count = 4;

        let waiters: Vec<_> = (0..waiter_count)
            .map(|i| {
                let runtime = runtime.clone();
                let obj = obj.clone();
                let resumed = resumed.clone();
                thread::spawn(move || {
                    let me = runtime.attach_thread(format!("waiter-{}", i));
                    runtime.enter(&obj, &me);
                    let status = runtime.wait(&obj, &me, 0).unwrap();
                    assert_eq!(status, WaitStatus::Notified);
                    // Each waiter individually re-acquires before proceeding
                    assert!(runtime.holds_lock(&me, &obj));
                    resumed.fetch_add(1, Ordering::SeqCst);
                    runtime.exit(&obj, &me).unwrap();
                    runtime.detach_thread(&me);
                })
            })
            .collect();

        let main = runtime.attach_thread("main");
        // Wait until every waiter has parked
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            thread::sleep(Duration::from_millis(20));
            runtime.enter(&obj, &main);
            let waiting = runtime.notify_all(&obj, &main).unwrap();
            runtime.exit(&obj, &main).unwrap();
            if waiting == waiter_count || Instant::now() > deadline {
                break;
            }
        }

        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert_eq!(resumed.load(Ordering::SeqCst), waiter_count as u32);
        runtime.detach_thread(&main);
    }
}

#[test]
fn test_notify_with_zero_waiters_is_noop() {
    for mode in ALL_MODES {
        let runtime = MonitorRuntime::initialize(SyncConfig::foreground(mode));
        let obj = RuntimeObject::new();
        let main = runtime.attach_thread("main");

        runtime.enter(&obj, &main);
        assert_eq!(runtime.notify(&obj, &main).unwrap(), 0, "{:?}", mode);
        assert_eq!(runtime.notify_all(&obj, &main).unwrap(), 0, "{:?}", mode);
        runtime.exit(&obj, &main).unwrap();
        runtime.detach_thread(&main);
    }
}

// ============================================================================
// Timeouts
// ============================================================================

#[test]
fn test_timed_wait_returns_within_margin() {
    for mode in ALL_MODES {
        let runtime = MonitorRuntime::initialize(SyncConfig::foreground(mode));
        let obj = RuntimeObject::new();
        let main = runtime.attach_thread("main");

        runtime.enter(&obj, &main);
        let start = Instant::now();
        let status = runtime.wait(&obj, &main, 50).unwrap();
        let elapsed = start.elapsed();

        assert_eq!(status, WaitStatus::TimedOut, "{:?}", mode);
        assert!(elapsed >= Duration::from_millis(50), "{:?}: {:?}", mode, elapsed);
        assert!(elapsed < Duration::from_secs(2), "{:?}: {:?}", mode, elapsed);
        // The caller holds the lock again on return
        assert!(runtime.holds_lock(&main, &obj));
        runtime.exit(&obj, &main).unwrap();
        runtime.detach_thread(&main);
    }
}

#[test]
fn test_negative_timeout_rejected_without_side_effects() {
    for mode in ALL_MODES {
        let runtime = MonitorRuntime::initialize(SyncConfig::foreground(mode));
        let obj = RuntimeObject::new();
        let main = runtime.attach_thread("main");

        runtime.enter(&obj, &main);
        let start = Instant::now();
        let err = runtime.wait(&obj, &main, -1).unwrap_err();
        assert!(matches!(err, SyncError::InvalidTimeout(-1)), "{:?}", mode);
        // Fails immediately, without blocking or dropping the lock
        assert!(start.elapsed() < Duration::from_millis(50));
        assert!(runtime.holds_lock(&main, &obj));
        runtime.exit(&obj, &main).unwrap();
        runtime.detach_thread(&main);
    }
}

// ============================================================================
// Illegal states
// ============================================================================

#[test]
fn test_wait_without_lock_is_illegal() {
    for mode in ALL_MODES {
        let runtime = MonitorRuntime::initialize(SyncConfig::foreground(mode));
        let obj = RuntimeObject::new();
        let main = runtime.attach_thread("main");

        let err = runtime.wait(&obj, &main, 0).unwrap_err();
        assert!(matches!(err, SyncError::IllegalMonitorState(_)), "{:?}", mode);
        runtime.detach_thread(&main);
    }
}

#[test]
fn test_notify_without_lock_is_illegal() {
    for mode in ALL_MODES {
        let runtime = MonitorRuntime::initialize(SyncConfig::foreground(mode));
        let obj = RuntimeObject::new();
        let main = runtime.attach_thread("main");

        assert!(runtime.notify(&obj, &main).is_err(), "{:?}", mode);
        assert!(runtime.notify_all(&obj, &main).is_err(), "{:?}", mode);

        // Also illegal while another thread holds the lock
        let holder = {
            let runtime = runtime.clone();
            let obj = obj.clone();
            thread::spawn(move || {
                let me = runtime.attach_thread("holder");
                runtime.enter(&obj, &me);
                thread::sleep(Duration::from_millis(100));
                runtime.exit(&obj, &me).unwrap();
                runtime.detach_thread(&me);
            })
        };
        thread::sleep(Duration::from_millis(30));
        assert!(runtime.notify(&obj, &main).is_err(), "{:?}", mode);
        holder.join().unwrap();
        runtime.detach_thread(&main);
    }
}

// ============================================================================
// Interruption
// ============================================================================

#[test]
fn test_interrupt_releases_wait_with_status() {
    for mode in ALL_MODES {
        let runtime = MonitorRuntime::initialize(SyncConfig::foreground(mode));
        let obj = RuntimeObject::new();

        let (tx, rx) = std::sync::mpsc::channel();
        let waiter = {
            let runtime = runtime.clone();
            let obj = obj.clone();
            thread::spawn(move || {
                let me = runtime.attach_thread("waiter");
                tx.send(me.clone()).unwrap();
                runtime.enter(&obj, &me);
                let status = runtime.wait(&obj, &me, 0).unwrap();
                // Ownership is intact despite the interrupt
                assert!(runtime.holds_lock(&me, &obj));
                runtime.exit(&obj, &me).unwrap();
                runtime.detach_thread(&me);
                status
            })
        };

        let waiter_thread = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(50));
        runtime.interrupt(&waiter_thread);

        let status = waiter.join().unwrap();
        assert_eq!(status, WaitStatus::Interrupted, "{:?}", mode);
    }
}

// ============================================================================
// Wait is usable in a condition loop
// ============================================================================

#[test]
fn test_producer_consumer_handoff() {
    for mode in ALL_MODES {
        let runtime = MonitorRuntime::initialize(SyncConfig::foreground(mode));
        let obj = RuntimeObject::new();
        let items = Arc::new(AtomicU32::new(0));
        let consumed = Arc::new(AtomicU32::new(0));
        let rounds = 50u32;

        let consumer = {
            let runtime = runtime.clone();
            let obj = obj.clone();
            let items = items.clone();
            let consumed = consumed.clone();
            thread::spawn(move || {
                let me = runtime.attach_thread("consumer");
                for _ in 0..rounds {
                    runtime.enter(&obj, &me);
                    while items.load(Ordering::SeqCst) == 0 {
                        runtime.wait(&obj, &me, 0).unwrap();
                    }
                    items.fetch_sub(1, Ordering::SeqCst);
                    consumed.fetch_add(1, Ordering::SeqCst);
                    runtime.exit(&obj, &me).unwrap();
                }
                runtime.detach_thread(&me);
            })
        };

        let producer = {
            let runtime = runtime.clone();
            let obj = obj.clone();
            let items = items.clone();
            thread::spawn(move || {
                let me = runtime.attach_thread("producer");
                for _ in 0..rounds {
                    runtime.enter(&obj, &me);
                    items.fetch_add(1, Ordering::SeqCst);
                    runtime.notify(&obj, &me).unwrap();
                    runtime.exit(&obj, &me).unwrap();
                    thread::yield_now();
                }
                runtime.detach_thread(&me);
            })
        };

        producer.join().unwrap();
        consumer.join().unwrap();
        assert_eq!(consumed.load(Ordering::SeqCst), rounds, "{:?}", mode);
    }
}
