/*!
 * Compiled-Method Grouping Sampler
 *
 * Periodic background sampler that observes which compiled method each
 * attached thread is executing and accumulates hotness groups. Fully
 * independent of the monitor subsystem - it shares no state with it and
 * holds no locks the engine takes.
 *
 * Methods the sampler has not been told about land on a bounded side
 * list; overflow drops the oldest entry and is counted rather than
 * growing without bound.
 */

use crate::core::limits::{SAMPLER_INTERVAL, SAMPLER_UNREGISTERED_CAP};
use crate::runtime::thread::ThreadRegistry;
use ahash::{HashMap, HashSet};
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub struct CodeGroupingSampler {
    threads: Arc<ThreadRegistry>,
    interval: Duration,
    registered: Mutex<HashSet<u64>>,
    groups: Mutex<HashMap<u64, u64>>,
    unregistered: Mutex<VecDeque<u64>>,
    dropped: AtomicU64,
    shutdown: AtomicBool,
    sleeper: Mutex<()>,
    wakeup: Condvar,
}

impl CodeGroupingSampler {
    pub fn new(threads: Arc<ThreadRegistry>) -> Self {
        Self {
            threads,
            interval: SAMPLER_INTERVAL,
            registered: Mutex::new(HashSet::default()),
            groups: Mutex::new(HashMap::default()),
            unregistered: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            sleeper: Mutex::new(()),
            wakeup: Condvar::new(),
        }
    }

    /// Announce a compiled method so samples of it are grouped
    pub fn register_method(&self, method: u64) {
        self.registered.lock().insert(method);
    }

    /// Take one sample of every attached thread
    pub fn sample_once(&self) {
        let registered = self.registered.lock();
        let mut groups = self.groups.lock();
        let mut unregistered = self.unregistered.lock();
        self.threads.for_each(|thread| {
            let method = thread.current_method();
            if method == 0 {
                return;
            }
            if registered.contains(&method) {
                *groups.entry(method).or_insert(0) += 1;
            } else {
                unregistered.push_back(method);
                if unregistered.len() > SAMPLER_UNREGISTERED_CAP {
                    unregistered.pop_front();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
    }

    /// Sample counts per registered method
    pub fn groups(&self) -> HashMap<u64, u64> {
        self.groups.lock().clone()
    }

    pub fn unregistered_len(&self) -> usize {
        self.unregistered.lock().len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn run_loop(&self) {
        debug!("code grouping sampler started");
        while !self.shutdown.load(Ordering::SeqCst) {
            {
                let mut guard = self.sleeper.lock();
                self.wakeup.wait_for(&mut guard, self.interval);
            }
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.sample_once();
        }
        debug!("code grouping sampler stopped");
    }

    pub fn spawn_background(self: &Arc<Self>) -> JoinHandle<()> {
        let sampler = self.clone();
        std::thread::Builder::new()
            .name("code-grouping-sampler".into())
            .spawn(move || sampler.run_loop())
            .expect("failed to spawn sampler thread")
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _guard = self.sleeper.lock();
        self.wakeup.notify_all();
    }
}
