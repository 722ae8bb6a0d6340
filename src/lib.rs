/*!
 * objsync - Object Monitor Subsystem
 * Multi-tier object locking and wait/notify for a managed runtime
 */

pub mod core;
pub mod runtime;
pub mod sync;

// Re-exports
pub use crate::core::errors::{Result, SyncError, WaitStatus};
pub use crate::runtime::{
    HandshakeExecutor, MonitorRuntime, Obj, RuntimeObject, RuntimeThread, ThreadListHandshake,
    ThreadRegistry,
};
pub use crate::sync::{
    DeflationCoordinator, DeflationReason, HashAlgorithm, InflationCause, LockingMode,
    ObjectSynchronizer, StatsSnapshot, SyncConfig, SyncStats, ValueBasedPolicy,
};
