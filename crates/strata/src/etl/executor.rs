//! The ETL executor: moves aged partitions down every PV's store chain.
//!
//! A job handles one PV and one stage. Its steps are: discover candidates,
//! append them into the destination (or skip data already recorded in the
//! destination's ledger), then back up and delete the source partitions. A
//! pass fans PVs out over a bounded worker pool. All stages of one PV run on
//! the same worker, in chain order.

use crate::config::{ConfigService, EtlOptions};
use crate::error::{EtlPhase, Result, StoreError};
use crate::etl::admin::AdminResponse;
use crate::etl::candidate::{discover, EtlCandidate};
use crate::etl::ledger::Ledger;
use crate::etl::metrics::{EtlMetrics, MetricsReport};
use crate::etl::stage::EtlStage;
use crate::store::{Fingerprint, SharedStore, StoragePlugin, StoredPartition};
use crate::time::Timestamp;
use crossbeam::channel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Consolidation runs ETL as if this many seconds had passed.
pub const CONSOLIDATION_LOOKAHEAD_SECS: i64 = 365 * 86_400;

/// Outcome of one job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    /// PV name.
    pub pv: String,
    /// Stage name, `SOURCE->DEST`.
    pub stage: String,
    /// Source partitions deleted after their data was kept.
    pub partitions_moved: usize,
    /// Partitions found already migrated by an earlier pass.
    pub already_migrated: usize,
    /// Partitions whose data was dropped.
    pub discarded: usize,
    /// Partitions left in place because they changed after discovery.
    pub left_in_place: usize,
    /// Aged partitions held back by gating.
    pub gated: usize,
    /// Stale empty partitions removed.
    pub stale_removed: usize,
    /// Events written into the destination.
    pub events_written: u64,
    /// Bytes of source partitions removed.
    pub bytes_moved: u64,
}

impl JobReport {
    fn new(pv: &str, stage: &EtlStage) -> Self {
        Self {
            pv: pv.to_string(),
            stage: stage.name(),
            ..Self::default()
        }
    }
}

/// Outcome of one pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassSummary {
    /// Logical time of the pass.
    pub now: Timestamp,
    /// True when the pass did not run because another was in progress.
    pub skipped: bool,
    /// PVs visited.
    pub pvs: usize,
    /// Reports of the jobs that succeeded.
    pub jobs: Vec<JobReport>,
    /// Jobs that failed.
    pub failures: Vec<AdminResponse>,
    /// Wall time in milliseconds.
    pub elapsed_ms: u64,
}

impl PassSummary {
    fn skipped(now: Timestamp) -> Self {
        Self {
            now,
            skipped: true,
            ..Self::default()
        }
    }

    /// Total partitions removed from sources (moved, skipped-as-migrated or discarded).
    pub fn partitions_removed(&self) -> usize {
        self.jobs
            .iter()
            .map(|job| job.partitions_moved + job.discarded)
            .sum()
    }

    /// Total events written into destinations.
    pub fn events_written(&self) -> u64 {
        self.jobs.iter().map(|job| job.events_written).sum()
    }

    /// Returns true when no job failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct PlannedPartition {
    partition: StoredPartition,
    fingerprint: Option<Fingerprint>,
    migrated: bool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

type PvOutcome = (Vec<JobReport>, Vec<AdminResponse>);

/// Runs ETL passes and the administrative variants.
///
/// # Examples
/// ```rust,ignore
/// use alopex_strata::config::{EtlOptions, StaticConfigService};
/// use alopex_strata::etl::EtlExecutor;
///
/// let service = Arc::new(StaticConfigService::new());
/// service.register_pv("ABC:DEF", &[sts_url, mts_url])?;
/// let executor = EtlExecutor::new(service, EtlOptions::default());
/// let summary = executor.run_etl(Timestamp::now());
/// assert!(summary.is_clean());
/// ```
pub struct EtlExecutor {
    config: Arc<dyn ConfigService>,
    options: EtlOptions,
    ledgers: Mutex<HashMap<PathBuf, Arc<Ledger>>>,
    metrics: EtlMetrics,
    running: AtomicBool,
}

impl EtlExecutor {
    /// Creates an executor.
    pub fn new(config: Arc<dyn ConfigService>, options: EtlOptions) -> Self {
        Self {
            config,
            options,
            ledgers: Mutex::new(HashMap::new()),
            metrics: EtlMetrics::default(),
            running: AtomicBool::new(false),
        }
    }

    /// Returns the configuration service.
    pub fn config(&self) -> &Arc<dyn ConfigService> {
        &self.config
    }

    /// Returns the executor options.
    pub fn options(&self) -> &EtlOptions {
        &self.options
    }

    /// Returns true while a pass is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs one pass over every PV as of `now`.
    ///
    /// The scheduler calls this with the wall clock; tests and the "run now"
    /// command pass a logical time. A call made while another pass is running
    /// returns a skipped summary.
    pub fn run_etl(&self, now: Timestamp) -> PassSummary {
        self.run_pass(now, &|_| true)
    }

    /// Drains every store marked `consolidateOnShutdown` into the next tier.
    pub fn shutdown_consolidation(&self, now: Timestamp) -> PassSummary {
        info!("Consolidating stores marked for shutdown consolidation");
        self.run_pass(now.plus_seconds(CONSOLIDATION_LOOKAHEAD_SECS), &|stage| {
            stage.source.config().consolidate_on_shutdown
        })
    }

    fn run_pass(&self, now: Timestamp, select: &(dyn Fn(&EtlStage) -> bool + Sync)) -> PassSummary {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(
                "An ETL pass is already running; skipping the pass at {}",
                now.to_iso8601()
            );
            return PassSummary::skipped(now);
        }
        let _guard = RunningGuard(&self.running);
        let started = Instant::now();

        let pvs = self.config.pv_names();
        let mut summary = PassSummary {
            now,
            pvs: pvs.len(),
            ..PassSummary::default()
        };
        let workers = self.options.parallelism.max(1).min(pvs.len());
        debug!(
            "Starting ETL pass at {} over {} PVs with {} workers",
            now.to_iso8601(),
            pvs.len(),
            workers
        );

        let (work_tx, work_rx) = channel::unbounded::<String>();
        let (result_tx, result_rx) = channel::unbounded::<PvOutcome>();
        for pv in pvs {
            // The receiver is alive until the end of this function.
            let _ = work_tx.send(pv);
        }
        drop(work_tx);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for pv in work_rx.iter() {
                        let outcome = self.run_pv(&pv, now, select);
                        if result_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        for (jobs, failures) in result_rx.iter() {
            summary.jobs.extend(jobs);
            summary.failures.extend(failures);
        }
        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "ETL pass at {} done in {} ms: {} partitions removed, {} events written, {} failures",
            now.to_iso8601(),
            summary.elapsed_ms,
            summary.partitions_removed(),
            summary.events_written(),
            summary.failures.len()
        );
        summary
    }

    fn run_pv(
        &self,
        pv: &str,
        now: Timestamp,
        select: &(dyn Fn(&EtlStage) -> bool + Sync),
    ) -> PvOutcome {
        let mut jobs = Vec::new();
        let mut failures = Vec::new();
        let Some(chain) = self.config.store_chain(pv) else {
            debug!("{} is no longer archived; skipping", pv);
            return (jobs, failures);
        };
        for stage in EtlStage::chain(&chain).iter().filter(|stage| select(stage)) {
            match self.run_job(pv, stage, now) {
                Ok(report) => jobs.push(report),
                Err(err) => {
                    error!("ETL job {} for {} failed: {}", stage.name(), pv, err);
                    failures.push(AdminResponse::failed(Some(pv), &err));
                }
            }
        }
        (jobs, failures)
    }

    /// Runs one stage for one PV and records its metrics.
    pub fn run_job(&self, pv: &str, stage: &EtlStage, now: Timestamp) -> Result<JobReport> {
        let started = Instant::now();
        let result = self.migrate(pv, stage, now);
        self.metrics
            .update(&stage.name(), started.elapsed(), |metrics| match &result {
                Ok(report) => {
                    metrics.partitions_moved += report.partitions_moved as u64;
                    metrics.partitions_already_migrated += report.already_migrated as u64;
                    metrics.partitions_discarded += report.discarded as u64;
                    metrics.bytes_moved += report.bytes_moved;
                    metrics.events_written += report.events_written;
                }
                Err(_) => metrics.failures += 1,
            });
        result
    }

    fn migrate(&self, pv: &str, stage: &EtlStage, now: Timestamp) -> Result<JobReport> {
        let source = stage.source.as_ref();
        let dest = stage.dest.as_ref();
        let mut report = JobReport::new(pv, stage);
        let etl_error = |phase: EtlPhase, err: StoreError| StoreError::EtlError {
            pv: pv.to_string(),
            source_store: source.name().to_string(),
            dest_store: dest.name().to_string(),
            phase,
            reason: err.to_string(),
        };

        let Some(etl_source) = source.etl_source() else {
            return Ok(report);
        };
        let flags = self.config.named_flags();
        let discovery = discover(pv, source, now, flags, self.config.gating())
            .map_err(|e| etl_error(EtlPhase::Discover, e))?;
        report.gated = discovery.gated;

        for stale in &discovery.stale_empty {
            match etl_source.delete_partition(pv, stale) {
                Ok(true) => {
                    info!(
                        "Removed stale empty partition {} of {} from {}",
                        stale.name,
                        pv,
                        source.name()
                    );
                    report.stale_removed += 1;
                }
                Ok(false) => {}
                Err(err) => warn!(
                    "Could not remove empty partition {} of {} from {}: {}",
                    stale.name,
                    pv,
                    source.name(),
                    err
                ),
            }
        }
        if discovery.candidates.is_empty() {
            return Ok(report);
        }

        let accept = match &dest.config().etl_into_store_if {
            Some(flag) => flags.get(flag),
            None => true,
        };
        let ledger = if accept {
            self.ledger_for(dest)
                .map_err(|e| etl_error(EtlPhase::Append, e))?
        } else {
            None
        };

        let mut planned = Vec::with_capacity(discovery.candidates.len());
        for EtlCandidate { partition, .. } in discovery.candidates {
            let (fingerprint, migrated) = match &ledger {
                Some(ledger) => {
                    let fingerprint = etl_source
                        .fingerprint(&partition)
                        .map_err(|e| etl_error(EtlPhase::Discover, e))?;
                    let recorded = ledger.lookup(source.name(), pv, &partition.name);
                    (Some(fingerprint), recorded == Some(fingerprint))
                }
                None => (None, false),
            };
            if migrated {
                debug!(
                    "Partition {} of {} is already in {}; finishing cleanup",
                    partition.name,
                    pv,
                    dest.name()
                );
                report.already_migrated += 1;
            }
            planned.push(PlannedPartition {
                partition,
                fingerprint,
                migrated,
            });
        }

        let pending: Vec<StoredPartition> = planned
            .iter()
            .filter(|p| !p.migrated)
            .map(|p| p.partition.clone())
            .collect();
        if !pending.is_empty() {
            if accept {
                let raw = etl_source
                    .open_partitions(pv, &pending)
                    .map_err(|e| etl_error(EtlPhase::Transform, e))?;
                let mut stream = stage
                    .transform(raw)
                    .map_err(|e| etl_error(EtlPhase::Transform, e))?;

                let etl_dest = dest.etl_dest();
                let appended = match etl_dest.stage_append(pv, &mut *stream) {
                    Ok(appended) => appended,
                    Err(err) => {
                        if let Err(discard_err) = etl_dest.discard_staged(pv) {
                            warn!(
                                "Could not discard staged data of {} in {}: {}",
                                pv,
                                dest.name(),
                                discard_err
                            );
                        }
                        return Err(etl_error(EtlPhase::Append, err));
                    }
                };
                drop(stream);
                etl_dest
                    .commit_staged(pv, now)
                    .map_err(|e| etl_error(EtlPhase::Append, e))?;
                report.events_written += appended.written;

                match &ledger {
                    Some(ledger) => {
                        for planned in planned.iter().filter(|p| !p.migrated) {
                            if let Some(fingerprint) = planned.fingerprint {
                                ledger
                                    .record(source.name(), pv, &planned.partition.name, fingerprint)
                                    .map_err(|e| etl_error(EtlPhase::Append, e))?;
                            }
                        }
                    }
                    None => report.discarded += pending.len(),
                }
                debug!(
                    "Appended {} events of {} from {} partitions into {}",
                    appended.written,
                    pv,
                    pending.len(),
                    dest.name()
                );
            } else {
                info!(
                    "Flag {} is false; dropping {} partitions of {} instead of moving them into {}",
                    dest.config().etl_into_store_if.as_deref().unwrap_or_default(),
                    pending.len(),
                    pv,
                    dest.name()
                );
                report.discarded += pending.len();
            }
        }

        let backup_folder = source.config().backup_folder.clone();
        for planned in &planned {
            let partition = &planned.partition;
            if let Some(folder) = &backup_folder {
                match etl_source.backup_partition(pv, partition, folder) {
                    Ok(path) => debug!("Backed up {} to {}", partition.name, path.display()),
                    Err(err) => warn!(
                        "Backup of {} of {} into {} failed; deleting anyway: {}",
                        partition.name,
                        pv,
                        folder.display(),
                        err
                    ),
                }
            }
            let deleted = etl_source
                .delete_partition(pv, partition)
                .map_err(|e| etl_error(EtlPhase::Delete, e))?;
            if !deleted {
                warn!(
                    "Partition {} of {} changed since discovery; leaving it in {} until the next pass",
                    partition.name,
                    pv,
                    source.name()
                );
                report.left_in_place += 1;
                continue;
            }
            report.bytes_moved += partition.size;
            if let Some(ledger) = &ledger {
                report.partitions_moved += 1;
                ledger
                    .clear(source.name(), pv, &partition.name)
                    .map_err(|e| etl_error(EtlPhase::Delete, e))?;
            }
        }

        info!(
            "ETL {} for {}: {} moved, {} already migrated, {} discarded",
            stage.name(),
            pv,
            report.partitions_moved,
            report.already_migrated,
            report.discarded
        );
        Ok(report)
    }

    fn ledger_for(&self, dest: &dyn StoragePlugin) -> Result<Option<Arc<Ledger>>> {
        let Some(dir) = dest.etl_dest().ledger_dir() else {
            return Ok(None);
        };
        let path = dir.join(&self.options.ledger_file);
        let mut ledgers = self.ledgers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ledger) = ledgers.get(&path) {
            return Ok(Some(ledger.clone()));
        }
        let ledger = Arc::new(Ledger::open(&path)?);
        ledgers.insert(path, ledger.clone());
        Ok(Some(ledger))
    }

    fn chain(&self, pv: &str) -> Result<Vec<SharedStore>> {
        self.config
            .store_chain(pv)
            .ok_or_else(|| StoreError::ConfigError(format!("PV {} is not archived here", pv)))
    }

    fn store_index(&self, pv: &str, chain: &[SharedStore], store: &str) -> Result<usize> {
        chain
            .iter()
            .position(|s| s.name() == store)
            .ok_or_else(|| StoreError::UnknownStore {
                pv: pv.to_string(),
                store: store.to_string(),
            })
    }

    /// Lists the partitions of every stage of `pv` that may migrate at `now`.
    pub fn list_candidates(&self, pv: &str, now: Timestamp) -> Result<Vec<EtlCandidate>> {
        let chain = self.chain(pv)?;
        let mut candidates = Vec::new();
        for stage in EtlStage::chain(&chain) {
            let found = discover(
                pv,
                stage.source.as_ref(),
                now,
                self.config.named_flags(),
                self.config.gating(),
            )?;
            candidates.extend(found.candidates);
        }
        Ok(candidates)
    }

    /// Moves the data of every tier before `store` down the chain into `store`.
    ///
    /// The PV should be paused first so no live writer races the move.
    pub fn consolidate(&self, pv: &str, store: &str, now: Timestamp) -> Result<Vec<JobReport>> {
        let chain = self.chain(pv)?;
        let index = self.store_index(pv, &chain, store)?;
        let later = now.plus_seconds(CONSOLIDATION_LOOKAHEAD_SECS);
        info!("Consolidating {} into {}", pv, store);
        EtlStage::chain(&chain[..=index])
            .iter()
            .map(|stage| self.run_job(pv, stage, later))
            .collect()
    }

    /// Moves every partition of `pv` from `from` directly into `to`, bypassing
    /// the tiers in between.
    pub fn move_data(&self, pv: &str, from: &str, to: &str, now: Timestamp) -> Result<JobReport> {
        let chain = self.chain(pv)?;
        let source = chain[self.store_index(pv, &chain, from)?].clone();
        let dest = chain[self.store_index(pv, &chain, to)?].clone();
        if source.name() == dest.name() {
            return Err(StoreError::ConfigError(format!(
                "cannot move {} from {} into itself",
                pv, from
            )));
        }
        info!("Moving data of {} from {} to {}", pv, from, to);
        let stage = EtlStage::new(source, dest);
        self.run_job(pv, &stage, now.plus_seconds(CONSOLIDATION_LOOKAHEAD_SECS))
    }

    /// Returns the per-stage counters.
    pub fn metrics(&self) -> MetricsReport {
        self.metrics.report()
    }

    /// Adds a gating interval (epoch milliseconds, half-open).
    pub fn keep_gating(&self, scope: &str, start_ms: i64, end_ms: i64) -> AdminResponse {
        if self.config.gating().keep(scope, start_ms, end_ms) {
            AdminResponse::ok(Some(scope), format!("gating {}..{} kept", start_ms, end_ms))
        } else {
            AdminResponse::failed(
                Some(scope),
                &StoreError::ConfigError(format!("empty gating interval {}..{}", start_ms, end_ms)),
            )
        }
    }

    /// Removes a gating interval; the bounds must match exactly.
    pub fn remove_gating(&self, scope: &str, start_ms: i64, end_ms: i64) -> AdminResponse {
        if self.config.gating().remove(scope, start_ms, end_ms) {
            AdminResponse::ok(Some(scope), format!("gating {}..{} removed", start_ms, end_ms))
        } else {
            AdminResponse::failed(
                Some(scope),
                &StoreError::ConfigError(format!("no gating interval {}..{}", start_ms, end_ms)),
            )
        }
    }

    /// Sets a named flag.
    pub fn set_flag(&self, name: &str, value: bool) -> AdminResponse {
        let previous = self.config.named_flags().set(name, value);
        AdminResponse::ok(None, format!("{} = {} (was {})", name, value, previous))
    }

    /// Reads a named flag; unknown flags are false.
    pub fn flag(&self, name: &str) -> bool {
        self.config.named_flags().get(name)
    }
}
