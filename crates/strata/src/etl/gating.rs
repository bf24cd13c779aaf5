//! Retention gating: time windows ETL must not delete.

use crate::partition::PartitionRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::{debug, warn};

/// Default number of intervals kept per scope.
pub const DEFAULT_GATING_CAPACITY: usize = 100;

/// Half-open interval `[start_ms, end_ms)` in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GatingInterval {
    /// First gated millisecond.
    pub start_ms: i64,
    /// First millisecond after the interval.
    pub end_ms: i64,
}

impl GatingInterval {
    /// Creates an interval; `None` unless `start_ms < end_ms`.
    pub fn new(start_ms: i64, end_ms: i64) -> Option<Self> {
        (start_ms < end_ms).then_some(Self { start_ms, end_ms })
    }

    /// Returns true if this interval shares at least one millisecond with `[start_ms, end_ms)`.
    pub fn overlaps(&self, start_ms: i64, end_ms: i64) -> bool {
        self.end_ms > start_ms && self.start_ms < end_ms
    }

    /// Returns true if this interval overlaps any second of the partition.
    pub fn overlaps_partition(&self, range: &PartitionRange) -> bool {
        self.overlaps(
            range.start.saturating_mul(1000),
            range.end.saturating_add(1).saturating_mul(1000),
        )
    }

    fn touches(&self, other: &GatingInterval) -> bool {
        other.end_ms >= self.start_ms && other.start_ms <= self.end_ms
    }
}

/// Gating intervals per scope (a PV name), kept sorted and merged.
#[derive(Debug)]
pub struct GatingIntervals {
    scopes: RwLock<BTreeMap<String, Vec<GatingInterval>>>,
    capacity: usize,
}

impl Default for GatingIntervals {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_GATING_CAPACITY)
    }
}

impl GatingIntervals {
    /// Creates an empty set with the default per-scope capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty set keeping at most `capacity` intervals per scope.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            scopes: RwLock::new(BTreeMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Adds `[start_ms, end_ms)` to a scope, merging it with every overlapping or
    /// adjacent interval. Returns false for an empty interval.
    ///
    /// When the scope is over capacity the oldest intervals are dropped.
    pub fn keep(&self, scope: &str, start_ms: i64, end_ms: i64) -> bool {
        let Some(mut merged) = GatingInterval::new(start_ms, end_ms) else {
            warn!(
                "Ignoring empty gating interval [{}, {}) for {}",
                start_ms, end_ms, scope
            );
            return false;
        };
        let mut scopes = self.scopes.write().unwrap_or_else(|e| e.into_inner());
        let intervals = scopes.entry(scope.to_string()).or_default();
        intervals.retain(|other| {
            if merged.touches(other) {
                merged.start_ms = merged.start_ms.min(other.start_ms);
                merged.end_ms = merged.end_ms.max(other.end_ms);
                false
            } else {
                true
            }
        });
        let position = intervals.partition_point(|other| other.start_ms < merged.start_ms);
        intervals.insert(position, merged);
        if intervals.len() > self.capacity {
            let excess = intervals.len() - self.capacity;
            intervals.drain(..excess);
            warn!("Dropped {} oldest gating intervals for {}", excess, scope);
        }
        debug!(
            "Gating [{}, {}) for {}",
            merged.start_ms, merged.end_ms, scope
        );
        true
    }

    /// Removes an interval that exactly matches `[start_ms, end_ms)`.
    pub fn remove(&self, scope: &str, start_ms: i64, end_ms: i64) -> bool {
        let mut scopes = self.scopes.write().unwrap_or_else(|e| e.into_inner());
        let Some(intervals) = scopes.get_mut(scope) else {
            return false;
        };
        let before = intervals.len();
        intervals.retain(|i| !(i.start_ms == start_ms && i.end_ms == end_ms));
        let removed = intervals.len() != before;
        if intervals.is_empty() {
            scopes.remove(scope);
        }
        removed
    }

    /// Returns the intervals of a scope, oldest first.
    pub fn intervals(&self, scope: &str) -> Vec<GatingInterval> {
        let scopes = self.scopes.read().unwrap_or_else(|e| e.into_inner());
        scopes.get(scope).cloned().unwrap_or_default()
    }

    /// Returns true if any interval of `scope` overlaps the partition.
    pub fn is_gated(&self, scope: &str, range: &PartitionRange) -> bool {
        let scopes = self.scopes.read().unwrap_or_else(|e| e.into_inner());
        scopes
            .get(scope)
            .is_some_and(|intervals| intervals.iter().any(|i| i.overlaps_partition(range)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_merges_overlapping_and_touching() {
        let gating = GatingIntervals::new();
        assert!(gating.keep("ABC:DEF", 100, 200));
        assert!(gating.keep("ABC:DEF", 500, 600));
        assert!(gating.keep("ABC:DEF", 200, 300));
        assert!(gating.keep("ABC:DEF", 550, 700));
        assert_eq!(
            gating.intervals("ABC:DEF"),
            vec![
                GatingInterval { start_ms: 100, end_ms: 300 },
                GatingInterval { start_ms: 500, end_ms: 700 },
            ]
        );
        assert!(gating.keep("ABC:DEF", 0, 1000));
        assert_eq!(gating.intervals("ABC:DEF").len(), 1);
        assert!(!gating.keep("ABC:DEF", 10, 10));
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let gating = GatingIntervals::with_capacity(3);
        for i in 0..5 {
            gating.keep("pv", i * 10, i * 10 + 5);
        }
        let starts: Vec<i64> = gating.intervals("pv").iter().map(|i| i.start_ms).collect();
        assert_eq!(starts, vec![20, 30, 40]);
    }

    #[test]
    fn test_remove_requires_exact_match() {
        let gating = GatingIntervals::new();
        gating.keep("pv", 0, 100);
        assert!(!gating.remove("pv", 0, 50));
        assert!(gating.remove("pv", 0, 100));
        assert!(gating.intervals("pv").is_empty());
    }

    #[test]
    fn test_partition_overlap_is_half_open() {
        let gating = GatingIntervals::new();
        // Gate exactly the second hour of the epoch.
        gating.keep("pv", 3_600_000, 7_200_000);
        let hour = |h: i64| PartitionRange {
            start: h * 3600,
            end: h * 3600 + 3599,
        };
        assert!(!gating.is_gated("pv", &hour(0)));
        assert!(gating.is_gated("pv", &hour(1)));
        assert!(!gating.is_gated("pv", &hour(2)));
        assert!(!gating.is_gated("other", &hour(1)));
    }
}
