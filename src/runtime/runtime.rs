/*!
 * Monitor Runtime Facade
 *
 * Wires the locking engine, deflation coordinator, thread registry, and
 * background threads together, and exposes the boundary contract the
 * surrounding runtime consumes.
 */

use crate::core::errors::{Result, WaitStatus};
use crate::core::types::{HashCode, ThreadId};
use crate::runtime::handshake::{HandshakeExecutor, ThreadListHandshake};
use crate::runtime::object::Obj;
use crate::runtime::sampler::CodeGroupingSampler;
use crate::runtime::thread::{RuntimeThread, ThreadRegistry};
use crate::sync::config::SyncConfig;
use crate::sync::deflation::{DeflationCoordinator, DeflationReason};
use crate::sync::engine::ObjectSynchronizer;
use crate::sync::stats::StatsSnapshot;
use log::info;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub struct MonitorRuntime {
    threads: Arc<ThreadRegistry>,
    synchronizer: Arc<ObjectSynchronizer>,
    coordinator: Arc<DeflationCoordinator>,
    sampler: Option<Arc<CodeGroupingSampler>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    deflation_thread_running: bool,
    stopped: AtomicBool,
}

impl MonitorRuntime {
    /// Initialize the subsystem: build the engine, the coordinator, and
    /// any configured background threads
    pub fn initialize(config: SyncConfig) -> Arc<Self> {
        Self::initialize_with_handshake(config.clone(), |threads| {
            Arc::new(ThreadListHandshake::new(threads))
        })
    }

    /// As `initialize`, with a caller-supplied handshake executor
    pub fn initialize_with_handshake(
        config: SyncConfig,
        make_handshake: impl FnOnce(Arc<ThreadRegistry>) -> Arc<dyn HandshakeExecutor>,
    ) -> Arc<Self> {
        let threads = Arc::new(ThreadRegistry::new());
        let synchronizer = Arc::new(ObjectSynchronizer::new(config.clone(), threads.clone()));
        let handshake = make_handshake(threads.clone());
        let coordinator = Arc::new(DeflationCoordinator::new(
            synchronizer.clone(),
            config.deflation.clone(),
            handshake,
        ));

        let mut background = Vec::new();
        if config.start_deflation_thread {
            background.push(coordinator.spawn_background());
        }
        let sampler = if config.start_sampler_thread {
            let sampler = Arc::new(CodeGroupingSampler::new(threads.clone()));
            background.push(sampler.spawn_background());
            Some(sampler)
        } else {
            None
        };

        info!("monitor subsystem initialized ({:?} tier)", config.mode);
        Arc::new(Self {
            threads,
            synchronizer,
            coordinator,
            sampler,
            background: Mutex::new(background),
            deflation_thread_running: config.start_deflation_thread,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn threads(&self) -> &Arc<ThreadRegistry> {
        &self.threads
    }

    pub fn synchronizer(&self) -> &Arc<ObjectSynchronizer> {
        &self.synchronizer
    }

    pub fn coordinator(&self) -> &Arc<DeflationCoordinator> {
        &self.coordinator
    }

    pub fn sampler(&self) -> Option<&Arc<CodeGroupingSampler>> {
        self.sampler.as_ref()
    }

    // ---- thread lifecycle ----

    pub fn attach_thread(&self, name: impl Into<String>) -> Arc<RuntimeThread> {
        let thread = self.threads.attach(name);
        self.coordinator.thread_attached();
        thread
    }

    /// Tear a thread down, releasing anything it still holds
    pub fn detach_thread(&self, thread: &RuntimeThread) {
        self.synchronizer.release_owned_monitors(thread);
        self.threads.detach(thread.id());
        self.coordinator.thread_detached();
    }

    // ---- boundary operations ----

    pub fn enter(&self, obj: &Obj, thread: &RuntimeThread) {
        self.synchronizer.enter(obj, thread);
    }

    pub fn exit(&self, obj: &Obj, thread: &RuntimeThread) -> Result<()> {
        self.synchronizer.exit(obj, thread)
    }

    pub fn wait(&self, obj: &Obj, thread: &RuntimeThread, millis: i64) -> Result<WaitStatus> {
        self.synchronizer.wait(obj, thread, millis)
    }

    pub fn notify(&self, obj: &Obj, thread: &RuntimeThread) -> Result<usize> {
        self.synchronizer.notify(obj, thread)
    }

    pub fn notify_all(&self, obj: &Obj, thread: &RuntimeThread) -> Result<usize> {
        self.synchronizer.notify_all(obj, thread)
    }

    pub fn holds_lock(&self, thread: &RuntimeThread, obj: &Obj) -> bool {
        self.synchronizer.holds_lock(thread, obj)
    }

    pub fn lock_owner(&self, obj: &Obj) -> Option<ThreadId> {
        self.synchronizer.lock_owner(obj)
    }

    pub fn fast_hash_code(&self, thread: &RuntimeThread, obj: &Obj) -> HashCode {
        self.synchronizer.fast_hash_code(thread, obj)
    }

    pub fn interrupt(&self, thread: &RuntimeThread) {
        self.synchronizer.interrupt(thread);
    }

    /// Release everything the thread still holds without detaching it
    pub fn release_owned_monitors(&self, thread: &RuntimeThread) {
        self.synchronizer.release_owned_monitors(thread);
    }

    /// Request an asynchronous deflation cycle; returns whether one
    /// completed within the timeout. Without a background thread the
    /// cycle runs inline.
    pub fn request_deflation(&self, timeout: Duration) -> bool {
        if self.deflation_thread_running {
            self.coordinator.request_deflation(timeout)
        } else {
            self.coordinator.run_cycle(DeflationReason::Explicit);
            true
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        let registry = self.synchronizer.registry();
        self.synchronizer
            .stats()
            .snapshot(registry.count(), registry.max())
    }

    /// Stop background threads and run the final audit. Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.coordinator.stop();
        if let Some(sampler) = &self.sampler {
            sampler.stop();
        }
        for handle in self.background.lock().drain(..) {
            let _ = handle.join();
        }
        if !self.deflation_thread_running {
            // No background loop ran the shutdown audit for us
            self.coordinator.run_cycle(DeflationReason::Shutdown);
            self.synchronizer.registry().audit();
        }
        info!("monitor subsystem shut down");
    }
}

impl Drop for MonitorRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
