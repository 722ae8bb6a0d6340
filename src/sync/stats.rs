/*!
 * Synchronization Statistics
 * Advisory atomic counters and serializable snapshots
 */

use crate::core::types::InflationCause;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Advisory counters maintained by the engine and coordinator.
///
/// Counts tolerate races during concurrent updates; exactness at every
/// instant is not contractual. The registry audit cross-checks the in-use
/// accounting once per shutdown.
#[derive(Debug, Default)]
pub struct SyncStats {
    inflations: [AtomicU64; InflationCause::COUNT],
    deflations: AtomicU64,
    deflation_cycles: AtomicU64,
    no_progress_cycles: AtomicU64,
    ceiling_bumps: AtomicU64,
    hash_installs: AtomicU64,
    value_based_hits: AtomicU64,
    lock_stack_overflows: AtomicU64,
    deflate_on_exit_wins: AtomicU64,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_inflation(&self, cause: InflationCause) {
        self.inflations[cause.index()].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_deflations(&self, n: u64) {
        self.deflations.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cycle(&self) {
        self.deflation_cycles.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_no_progress(&self) {
        self.no_progress_cycles.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ceiling_bump(&self) {
        self.ceiling_bumps.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_hash_install(&self) {
        self.hash_installs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_value_based_hit(&self) {
        self.value_based_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_lock_stack_overflow(&self) {
        self.lock_stack_overflows.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_deflate_on_exit(&self) {
        self.deflate_on_exit_wins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_inflations(&self) -> u64 {
        self.inflations
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    pub fn snapshot(&self, in_use: usize, in_use_max: usize) -> StatsSnapshot {
        let mut by_cause = Vec::with_capacity(InflationCause::COUNT);
        for (i, counter) in self.inflations.iter().enumerate() {
            let count = counter.load(Ordering::Relaxed);
            if count > 0 {
                by_cause.push(InflationCount {
                    cause: cause_by_index(i),
                    count,
                });
            }
        }
        StatsSnapshot {
            monitors_in_use: in_use,
            monitors_in_use_max: in_use_max,
            inflations: self.total_inflations(),
            inflations_by_cause: by_cause,
            deflations: self.deflations.load(Ordering::Relaxed),
            deflation_cycles: self.deflation_cycles.load(Ordering::Relaxed),
            no_progress_cycles: self.no_progress_cycles.load(Ordering::Relaxed),
            ceiling_bumps: self.ceiling_bumps.load(Ordering::Relaxed),
            hash_installs: self.hash_installs.load(Ordering::Relaxed),
            value_based_hits: self.value_based_hits.load(Ordering::Relaxed),
            lock_stack_overflows: self.lock_stack_overflows.load(Ordering::Relaxed),
            deflate_on_exit_wins: self.deflate_on_exit_wins.load(Ordering::Relaxed),
        }
    }
}

fn cause_by_index(i: usize) -> InflationCause {
    match i {
        0 => InflationCause::MonitorEnter,
        1 => InflationCause::Wait,
        2 => InflationCause::Notify,
        3 => InflationCause::HashCode,
        4 => InflationCause::NativeEnter,
        5 => InflationCause::NativeExit,
        _ => InflationCause::VmInternal,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InflationCount {
    pub cause: InflationCause,
    pub count: u64,
}

/// Point-in-time view of the subsystem's counters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StatsSnapshot {
    pub monitors_in_use: usize,
    pub monitors_in_use_max: usize,
    pub inflations: u64,
    pub inflations_by_cause: Vec<InflationCount>,
    pub deflations: u64,
    pub deflation_cycles: u64,
    pub no_progress_cycles: u64,
    pub ceiling_bumps: u64,
    pub hash_installs: u64,
    pub value_based_hits: u64,
    pub lock_stack_overflows: u64,
    pub deflate_on_exit_wins: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inflation_counting() {
        let stats = SyncStats::new();
        stats.record_inflation(InflationCause::MonitorEnter);
        stats.record_inflation(InflationCause::MonitorEnter);
        stats.record_inflation(InflationCause::Wait);
        assert_eq!(stats.total_inflations(), 3);

        let snapshot = stats.snapshot(5, 9);
        assert_eq!(snapshot.monitors_in_use, 5);
        assert_eq!(snapshot.monitors_in_use_max, 9);
        assert_eq!(snapshot.inflations, 3);
        assert_eq!(snapshot.inflations_by_cause.len(), 2);
    }

    #[test]
    fn test_snapshot_serialization() {
        let stats = SyncStats::new();
        stats.record_inflation(InflationCause::HashCode);
        stats.record_deflations(2);
        let snapshot = stats.snapshot(1, 1);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("hash_code"));
    }
}
