/*!
 * Thread Rendezvous
 *
 * Boundary to the runtime's handshake facility. The deflation coordinator
 * consumes this trait; the default implementation walks the thread
 * registry and runs the closure against each attached thread, serializing
 * with the thread's own cache use through the per-thread cache lock. A
 * runtime with a true safepoint executor plugs in here instead.
 */

use crate::runtime::thread::{RuntimeThread, ThreadRegistry};
use log::debug;
use std::sync::Arc;
use std::time::Instant;

pub trait HandshakeExecutor: Send + Sync {
    /// Run `op` once for every attached thread. When this returns, every
    /// thread has executed the operation - after a cache-clearing
    /// handshake, no thread can still resolve a monitor through state the
    /// operation cleared.
    fn execute(&self, tag: &str, op: &mut dyn FnMut(&RuntimeThread));

    /// Whether an external rendezvous request is pending. Long registry
    /// walks poll this and yield to it.
    fn has_pending(&self) -> bool {
        false
    }
}

/// Default executor over the thread registry
pub struct ThreadListHandshake {
    threads: Arc<ThreadRegistry>,
}

impl ThreadListHandshake {
    pub fn new(threads: Arc<ThreadRegistry>) -> Self {
        Self { threads }
    }
}

impl HandshakeExecutor for ThreadListHandshake {
    fn execute(&self, tag: &str, op: &mut dyn FnMut(&RuntimeThread)) {
        let start = Instant::now();
        let mut reached = 0usize;
        self.threads.for_each(|thread| {
            op(thread);
            reached += 1;
        });
        debug!(
            "handshake '{}' reached {} threads in {:?}",
            tag,
            reached,
            start.elapsed()
        );
    }
}
