/*!
 * Core Types
 * Common identifiers used across the monitor subsystem
 */

use serde::{Deserialize, Serialize};

/// Runtime thread identifier, assigned by the thread registry at attach time
pub type ThreadId = u32;

/// Object identifier, assigned at object creation; stands in for the object
/// address in a runtime whose heap may relocate objects
pub type ObjectId = u64;

/// Monitor identifier: slot index in the monitor arena
pub type MonitorId = u32;

/// Sentinel for "no monitor" in registry links and caches
pub const NO_MONITOR: MonitorId = MonitorId::MAX;

/// Identity hash value: nonzero, masked to the header hash field width
pub type HashCode = i32;

/// Why a monitor was inflated. Diagnostic only - carried to counters and
/// logs, never consulted for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InflationCause {
    MonitorEnter,
    Wait,
    Notify,
    HashCode,
    NativeEnter,
    NativeExit,
    VmInternal,
}

impl InflationCause {
    pub const COUNT: usize = 7;

    #[inline]
    pub fn index(self) -> usize {
        match self {
            InflationCause::MonitorEnter => 0,
            InflationCause::Wait => 1,
            InflationCause::Notify => 2,
            InflationCause::HashCode => 3,
            InflationCause::NativeEnter => 4,
            InflationCause::NativeExit => 5,
            InflationCause::VmInternal => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            InflationCause::MonitorEnter => "monitor_enter",
            InflationCause::Wait => "wait",
            InflationCause::Notify => "notify",
            InflationCause::HashCode => "hash_code",
            InflationCause::NativeEnter => "native_enter",
            InflationCause::NativeExit => "native_exit",
            InflationCause::VmInternal => "vm_internal",
        }
    }
}
