//! ETL candidate discovery.

use crate::error::Result;
use crate::etl::{GatingIntervals, NamedFlags};
use crate::store::{StoragePlugin, StoredPartition};
use crate::time::Timestamp;
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, warn};

/// A source partition that may migrate in this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtlCandidate {
    /// PV name.
    pub pv: String,
    /// Name of the source store.
    pub source_store: String,
    /// The partition.
    pub partition: StoredPartition,
    /// First second holding data, or the partition start when unreadable.
    pub first_second: i64,
}

/// Outcome of discovery for one PV in one source store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Partitions to migrate, oldest first.
    pub candidates: Vec<EtlCandidate>,
    /// Zero-length or header-only partitions old enough to be removed.
    pub stale_empty: Vec<StoredPartition>,
    /// Aged partitions held back by a gating interval.
    pub gated: usize,
}

/// Lists the partitions of `pv` in `source` that are eligible to migrate at `now`.
///
/// A partition is eligible once `now` lies in a strictly later partition. Gated,
/// empty and header-only partitions are never candidates. With `hold`/`gather`
/// configured nothing is returned until the oldest partition is `hold` chunks old;
/// then every partition at least `hold - gather + 1` chunks old is returned.
///
/// Discovery only reads the store.
///
/// # Examples
/// ```rust,ignore
/// use alopex_strata::etl::{discover, GatingIntervals, NamedFlags};
///
/// let found = discover("ABC:DEF", sts.as_ref(), Timestamp::now(), &flags, &gating)?;
/// for candidate in &found.candidates {
///     println!("{} {:?}", candidate.partition.name, candidate.partition.range);
/// }
/// ```
pub fn discover(
    pv: &str,
    source: &dyn StoragePlugin,
    now: Timestamp,
    flags: &NamedFlags,
    gating: &GatingIntervals,
) -> Result<Discovery> {
    let config = source.config();
    let mut discovery = Discovery::default();

    if let Some(flag) = &config.etl_outof_store_if {
        if !flags.get(flag) {
            debug!(
                "Flag {} is false; nothing moves out of {} for {}",
                flag, config.name, pv
            );
            return Ok(discovery);
        }
    }
    let Some(etl_source) = source.etl_source() else {
        return Ok(discovery);
    };

    let granularity = config.granularity;
    let now_secs = now.epoch_seconds();
    let chunk = granularity.approx_seconds_per_chunk();
    let last_eligible_second = granularity.previous_partition_last_second(now_secs);
    let stale_before = now_secs - chunk * (i64::from(config.hold) + 1);

    let mut eligible = Vec::new();
    for partition in etl_source.partitions(pv)? {
        if partition.range.end > last_eligible_second {
            continue;
        }
        if gating.is_gated(pv, &partition.range) {
            debug!(
                "Partition {} of {} is gated; leaving it in {}",
                partition.name, pv, config.name
            );
            discovery.gated += 1;
            continue;
        }

        let first_second = if partition.size == 0 {
            None
        } else {
            match partition.source.info() {
                Ok(Some(info)) => info.first_event.map(|event| event.timestamp.epoch_seconds()),
                Ok(None) => None,
                Err(err) if err.is_corruption() => {
                    warn!(
                        "Partition {} of {} is damaged ({}); migrating what can be read",
                        partition.source.display_name(),
                        pv,
                        err
                    );
                    Some(partition.range.start)
                }
                Err(err) => return Err(err),
            }
        };

        match first_second {
            Some(first_second) => eligible.push(EtlCandidate {
                pv: pv.to_string(),
                source_store: config.name.clone(),
                partition,
                first_second,
            }),
            None => {
                warn!(
                    "Skipping empty partition {} of {} in {}",
                    partition.source.display_name(),
                    pv,
                    config.name
                );
                if modified_epoch_seconds(&partition) < stale_before {
                    discovery.stale_empty.push(partition);
                }
            }
        }
    }

    discovery.candidates = if config.hold == 0 && config.gather == 0 {
        eligible
    } else {
        apply_hold_and_gather(eligible, now_secs, config.hold, config.gather, source)
    };
    debug!(
        "Found {} candidates for {} in {} ({} gated, {} stale empty)",
        discovery.candidates.len(),
        pv,
        config.name,
        discovery.gated,
        discovery.stale_empty.len()
    );
    Ok(discovery)
}

fn apply_hold_and_gather(
    eligible: Vec<EtlCandidate>,
    now_secs: i64,
    hold: u32,
    gather: u32,
    source: &dyn StoragePlugin,
) -> Vec<EtlCandidate> {
    let granularity = source.config().granularity;
    let chunk = granularity.approx_seconds_per_chunk();
    let hold = i64::from(hold);
    let gather = i64::from(gather.max(1));
    let hold_secs = granularity.previous_partition_last_second(now_secs - chunk * hold);
    let gather_secs =
        granularity.previous_partition_last_second(now_secs - chunk * (hold - gather + 1));

    let Some(oldest) = eligible.first() else {
        return eligible;
    };
    if oldest.first_second > hold_secs {
        debug!(
            "Oldest partition {} of {} is younger than the hold of {} partitions",
            oldest.partition.name, oldest.pv, hold
        );
        return Vec::new();
    }
    eligible
        .into_iter()
        .take_while(|candidate| candidate.first_second <= gather_secs)
        .collect()
}

fn modified_epoch_seconds(partition: &StoredPartition) -> i64 {
    partition
        .modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as i64
}
