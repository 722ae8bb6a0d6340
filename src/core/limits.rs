/*!
 * Subsystem Limits and Constants
 *
 * Centralized location for all tunable thresholds and magic numbers.
 * Organized by domain for maintainability and discoverability.
 *
 * ## Design Philosophy
 * - All values include rationale comments explaining WHY they exist
 * - Values here are defaults; most are overridable through `SyncConfig`
 * - Performance-critical constants are marked with [PERF]
 */

use std::time::Duration;

// =============================================================================
// HEADER WORD LAYOUT
// =============================================================================

/// Width of the identity hash field in the header word
/// Matches the sign bit constraint of the language-level 32-bit hash
pub const HASH_BITS: u32 = 31;

/// Bit position of the hash field in a neutral header word
pub const HASH_SHIFT: u32 = 8;

/// Substitute value when a generated hash masks to zero
/// Zero means "no hash yet" in the header and must never be a real hash
pub const HASH_ZERO_SUBSTITUTE: i32 = 1;

// =============================================================================
// LOCK STACK / LOCK RECORDS
// =============================================================================

/// Capacity of the per-thread lock-stack (lightweight tier)
/// Overflow forces inflation of the oldest entry, so this bounds memory
/// without bounding nesting depth
/// [PERF] Small enough to stay in one cache line pair
pub const LOCK_STACK_CAPACITY: usize = 8;

/// Initial capacity of the per-thread lock-record area (legacy tier)
/// The area grows on demand; records stand in for call-frame slots
pub const LOCK_RECORD_INITIAL_CAPACITY: usize = 32;

/// Per-thread monitor lookup cache entries (lightweight tier)
/// [PERF] Linear scan; keep small
pub const OM_CACHE_SIZE: usize = 8;

// =============================================================================
// INFLATION CONTENTION
// =============================================================================

/// Bounded spin iterations before the inflation ladder escalates to yield
/// [PERF] Covers the common case of a racing inflator finishing quickly
pub const INFLATION_SPIN_LIMIT: u32 = 100;

/// Yield iterations before the ladder escalates to parking on a stripe
pub const INFLATION_YIELD_LIMIT: u32 = 10;

/// Number of striped inflation locks
/// Fixed small table, never per-object, to bound memory; power of 2
pub const INFLATION_STRIPES: usize = 64;

/// Park timeout while waiting for an in-progress inflation to settle
/// A bound, not a correctness requirement; the waiter re-checks the header
pub const INFLATION_PARK_TIMEOUT: Duration = Duration::from_millis(1);

/// Spin attempts on a contended monitor before blocking on the entry queue
pub const MONITOR_ENTER_SPINS: u32 = 60;

// =============================================================================
// DEFLATION HEURISTICS
// =============================================================================

/// How often the coordinator thread wakes to evaluate trigger conditions
pub const DEFLATION_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Minimum time between threshold-triggered deflation cycles
pub const MIN_DEFLATION_INTERVAL: Duration = Duration::from_secs(1);

/// Hard upper bound on time between cycles; guarantees eventual cleanup
/// even when the usage threshold is never crossed
pub const GUARANTEED_DEFLATION_INTERVAL: Duration = Duration::from_secs(30);

/// Percentage of the in-use ceiling above which a cycle is triggered
pub const DEFLATION_THRESHOLD_PERCENT: u8 = 90;

/// Maximum monitors marked per cycle; bounds the pause contribution of a
/// single registry walk
pub const DEFLATION_BATCH_MAX: usize = 1_000;

/// Base value of the dynamic in-use ceiling
pub const IN_USE_CEILING_BASE: usize = 1_024;

/// Ceiling contribution per attached thread
pub const MONITORS_PER_THREAD_ESTIMATE: usize = 1_024;

/// Consecutive zero-progress cycles before the ceiling is force-bumped,
/// preventing live-lock of the threshold heuristic itself
pub const NO_PROGRESS_CEILING_BUMP_AFTER: u32 = 3;

/// How many registry nodes the unlink walk visits between rendezvous polls
/// Failing to poll can stall every thread in the runtime; keep this small
pub const UNLINK_POLL_INTERVAL: usize = 64;

// =============================================================================
// MONITOR ARENA
// =============================================================================

/// Monitors per arena chunk; chunks are allocated whole and never freed,
/// slots are recycled through the free queue
pub const MONITOR_CHUNK_SIZE: usize = 256;

// =============================================================================
// SAMPLER
// =============================================================================

/// Period of the compiled-method grouping sampler
pub const SAMPLER_INTERVAL: Duration = Duration::from_millis(100);

/// Bound on the unregistered-method side list; overflow drops the oldest
/// entry and increments a counter instead of growing without limit
pub const SAMPLER_UNREGISTERED_CAP: usize = 512;
