/*!
 * Synchronization Configuration
 *
 * Process-wide configuration for the monitor subsystem. Initialized once at
 * runtime startup, read-mostly thereafter; the locking tier in particular
 * is an init-time decision that engine code never re-checks beyond a single
 * selector read.
 */

use crate::core::limits;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Locking tier. Tiers are mutually exclusive for the lifetime of the
/// runtime; there is no dynamic fallback from a "wrong tier" situation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockingMode {
    /// Always inflate: every contended or uncontended enter uses a monitor
    HeavyweightOnly,
    /// Stack-locking with displaced headers embedded in the header word
    Legacy,
    /// Per-thread bounded lock-stack plus an external association table
    LightWeight,
}

/// Identity hash generation algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// One global xorshift state, CAS-updated
    GlobalRandom,
    /// Object identity XORed with a per-process random salt; stable across
    /// pauses because the salt never changes
    AddressXorSalt,
    /// Fixed constant - test and debug builds only
    Constant,
    /// Monotonically increasing counter
    Sequential,
    /// Raw object identity
    Address,
    /// Per-thread xorshift state; the default, since it never contends on
    /// shared state
    ThreadLocalXorshift,
}

/// Policy for synchronizing on identity-sensitive ("value-based") objects.
/// Diagnostic only - never affects locking correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueBasedPolicy {
    Off,
    Warn,
    Fatal,
}

/// Deflation coordinator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeflationConfig {
    /// Coordinator wake-up period for trigger evaluation
    pub check_interval: Duration,
    /// Minimum interval between threshold-triggered cycles
    pub min_interval: Duration,
    /// Hard bound on time between cycles; `None` disables the guarantee
    pub guaranteed_interval: Option<Duration>,
    /// Cycle when in-use monitors exceed this percentage of the ceiling;
    /// zero disables threshold triggering
    pub threshold_percent: u8,
    /// Maximum monitors marked per cycle
    pub batch_max: usize,
    /// Base of the dynamic in-use ceiling
    pub ceiling_base: usize,
    /// Ceiling contribution per attached thread
    pub per_thread_estimate: usize,
    /// Zero-progress cycles tolerated before the ceiling is force-bumped
    pub no_progress_bump_after: u32,
    /// Attempt speculative deflation when an uncontended monitor exits
    pub deflate_on_exit: bool,
}

impl Default for DeflationConfig {
    fn default() -> Self {
        Self {
            check_interval: limits::DEFLATION_CHECK_INTERVAL,
            min_interval: limits::MIN_DEFLATION_INTERVAL,
            guaranteed_interval: Some(limits::GUARANTEED_DEFLATION_INTERVAL),
            threshold_percent: limits::DEFLATION_THRESHOLD_PERCENT,
            batch_max: limits::DEFLATION_BATCH_MAX,
            ceiling_base: limits::IN_USE_CEILING_BASE,
            per_thread_estimate: limits::MONITORS_PER_THREAD_ESTIMATE,
            no_progress_bump_after: limits::NO_PROGRESS_CEILING_BUMP_AFTER,
            deflate_on_exit: true,
        }
    }
}

/// Top-level configuration for the monitor subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub mode: LockingMode,
    pub hash_algorithm: HashAlgorithm,
    pub value_based_policy: ValueBasedPolicy,
    /// Spin attempts on a contended monitor before parking
    pub enter_spin_limit: u32,
    /// Spin and yield budgets of the inflation ladder
    pub inflation_spin_limit: u32,
    pub inflation_yield_limit: u32,
    pub deflation: DeflationConfig,
    /// Spawn the background deflation thread at initialization. Tests drive
    /// cycles by hand with this off.
    pub start_deflation_thread: bool,
    /// Spawn the compiled-method grouping sampler thread
    pub start_sampler_thread: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: LockingMode::LightWeight,
            hash_algorithm: HashAlgorithm::ThreadLocalXorshift,
            value_based_policy: ValueBasedPolicy::Off,
            enter_spin_limit: limits::MONITOR_ENTER_SPINS,
            inflation_spin_limit: limits::INFLATION_SPIN_LIMIT,
            inflation_yield_limit: limits::INFLATION_YIELD_LIMIT,
            deflation: DeflationConfig::default(),
            start_deflation_thread: true,
            start_sampler_thread: false,
        }
    }
}

impl SyncConfig {
    /// Configuration for the given tier with background threads disabled;
    /// the common arrangement in unit tests
    pub fn foreground(mode: LockingMode) -> Self {
        Self {
            mode,
            start_deflation_thread: false,
            start_sampler_thread: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode_is_lightweight() {
        let config = SyncConfig::default();
        assert_eq!(config.mode, LockingMode::LightWeight);
        assert_eq!(config.hash_algorithm, HashAlgorithm::ThreadLocalXorshift);
    }

    #[test]
    fn test_foreground_disables_threads() {
        let config = SyncConfig::foreground(LockingMode::Legacy);
        assert_eq!(config.mode, LockingMode::Legacy);
        assert!(!config.start_deflation_thread);
        assert!(!config.start_sampler_thread);
    }

    #[test]
    fn test_config_serialization() {
        let config = SyncConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: SyncConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.mode, config.mode);
        assert_eq!(
            restored.deflation.threshold_percent,
            config.deflation.threshold_percent
        );
    }
}
