/*!
 * Object Synchronization
 *
 * The monitor subsystem proper: header-word codec, identity hash
 * generation, the monitor object and its arena, the lock-free in-use
 * registry, the hash-keyed association table, the multi-tier locking
 * protocol engine, and the asynchronous deflation coordinator.
 */

pub mod arena;
pub mod backoff;
pub mod config;
pub mod deflation;
pub mod engine;
pub mod hash;
pub mod header;
pub mod lock_stack;
pub mod monitor;
pub mod record;
pub mod registry;
pub mod stats;
pub mod table;

pub use crate::core::types::InflationCause;
pub use arena::{MonitorArena, MonitorHandle, PinnedMonitor};
pub use backoff::{Backoff, InflationStripes};
pub use config::{DeflationConfig, HashAlgorithm, LockingMode, SyncConfig, ValueBasedPolicy};
pub use deflation::{DeflationCoordinator, DeflationReason};
pub use engine::ObjectSynchronizer;
pub use header::{HeaderState, HeaderWord, MarkWord};
pub use lock_stack::LockStack;
pub use monitor::{EnterOutcome, ObjectMonitor, Owner};
pub use registry::InUseRegistry;
pub use stats::{StatsSnapshot, SyncStats};
pub use table::AssociationTable;
