//! Per-stage ETL counters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// Counters of one `SOURCE->DEST` stage, accumulated over every pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetrics {
    /// Jobs run for this stage.
    pub passes: u64,
    /// Source partitions migrated and deleted.
    pub partitions_moved: u64,
    /// Partitions found already migrated by an earlier, interrupted pass.
    pub partitions_already_migrated: u64,
    /// Partitions whose data was dropped by a black-hole destination or a false
    /// conditional-accept flag.
    pub partitions_discarded: u64,
    /// Bytes of source partitions migrated.
    pub bytes_moved: u64,
    /// Events written into the destination.
    pub events_written: u64,
    /// Jobs that failed.
    pub failures: u64,
    /// Cumulative job time in milliseconds.
    pub time_ms: u64,
}

/// Report of every stage, keyed by `SOURCE->DEST`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsReport {
    /// Stage counters.
    pub stages: BTreeMap<String, StageMetrics>,
}

impl MetricsReport {
    /// Returns the sum over all stages.
    pub fn total(&self) -> StageMetrics {
        self.stages.values().fold(StageMetrics::default(), |mut total, stage| {
            total.passes += stage.passes;
            total.partitions_moved += stage.partitions_moved;
            total.partitions_already_migrated += stage.partitions_already_migrated;
            total.partitions_discarded += stage.partitions_discarded;
            total.bytes_moved += stage.bytes_moved;
            total.events_written += stage.events_written;
            total.failures += stage.failures;
            total.time_ms += stage.time_ms;
            total
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct EtlMetrics {
    stages: Mutex<BTreeMap<String, StageMetrics>>,
}

impl EtlMetrics {
    pub(crate) fn update(
        &self,
        stage: &str,
        elapsed: Duration,
        update: impl FnOnce(&mut StageMetrics),
    ) {
        let mut stages = self.stages.lock().unwrap_or_else(|e| e.into_inner());
        let metrics = stages.entry(stage.to_string()).or_default();
        metrics.passes += 1;
        metrics.time_ms += elapsed.as_millis() as u64;
        update(metrics);
    }

    pub(crate) fn report(&self) -> MetricsReport {
        let stages = self.stages.lock().unwrap_or_else(|e| e.into_inner());
        MetricsReport {
            stages: stages.clone(),
        }
    }
}
