//! Storage plugins: the partitioned file store, its zip container and the black hole.
//!
//! The ETL engine only sees the traits in this module. A store is built from its URL
//! with [`store_from_config`]:
//!
//! ```rust,ignore
//! use alopex_strata::store::{store_from_config, StoreConfig};
//!
//! let config: StoreConfig =
//!     "pb://localhost?name=STS&rootFolder=/data/sts&partitionGranularity=PARTITION_HOUR".parse()?;
//! let store = store_from_config(config)?;
//! store.append("ABC:DEF", &mut events)?;
//! ```

mod append;
mod blackhole;
mod container;
mod info;
mod plain;
mod stream;
mod url;

pub use append::AppendSummary;
pub use blackhole::BlackholeStore;
pub use container::PartitionContainer;
pub use info::PartitionInfo;
pub use plain::PlainStore;
pub use stream::{PartitionSource, PartitionStream, SourceReader};
pub use url::{CompressionMode, StoreConfig, StoreScheme};

use crate::error::Result;
use crate::event::{BoxedEventStream, Event, EventStream};
use crate::partition::PartitionRange;
use crate::postprocess::ConversionFunction;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Operations every store backend supports.
pub trait StoragePlugin: Send + Sync + fmt::Debug {
    /// Store name, unique within a PV's chain.
    fn name(&self) -> &str;

    /// Effective configuration.
    fn config(&self) -> &StoreConfig;

    /// Canonical URL of this store.
    fn url(&self) -> String {
        self.config().to_url()
    }

    /// Appends a time-ordered stream; events at or before the last stored event are skipped.
    fn append(&self, pv: &str, stream: &mut dyn EventStream) -> Result<AppendSummary>;

    /// Streams every stored event with `start <= timestamp <= end`, preceded by the
    /// last event at or before `start` when one exists.
    fn get_data(&self, pv: &str, start: Timestamp, end: Timestamp) -> Result<BoxedEventStream>;

    /// Returns the newest readable event.
    fn last_known_event(&self, pv: &str) -> Result<Option<Event>>;

    /// Returns the oldest readable event.
    fn first_known_event(&self, pv: &str) -> Result<Option<Event>>;

    /// Moves every partition of `pv` to `new_pv`.
    fn rename(&self, pv: &str, new_pv: &str) -> Result<()>;

    /// Removes every partition of `pv`.
    fn delete(&self, pv: &str) -> Result<()>;

    /// Rewrites every partition of `pv` through `conversion`.
    fn convert(&self, pv: &str, conversion: &dyn ConversionFunction) -> Result<()>;

    /// Returns the ETL read side, if this store can hold data.
    fn etl_source(&self) -> Option<&dyn EtlSource>;

    /// Returns the ETL write side.
    fn etl_dest(&self) -> &dyn EtlDest;
}

/// Shared handle to a store.
pub type SharedStore = Arc<dyn StoragePlugin>;

/// One partition as seen by candidate discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPartition {
    /// Where the bytes live.
    pub source: PartitionSource,
    /// Partition file name.
    pub name: String,
    /// Time range covered.
    pub range: PartitionRange,
    /// Size in bytes (uncompressed for container entries).
    pub size: u64,
    /// Modification time of the file, or of the container for entries.
    pub modified: SystemTime,
}

/// Content fingerprint of a source partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Size in bytes.
    pub size: u64,
    /// xxh64 of the content.
    pub hash: u64,
}

impl Fingerprint {
    /// Fingerprints a buffer.
    pub fn of(data: &[u8]) -> Self {
        Self {
            size: data.len() as u64,
            hash: xxhash_rust::xxh64::xxh64(data, 0),
        }
    }
}

/// Read and cleanup side of an ETL stage.
pub trait EtlSource: Send + Sync {
    /// Lists the partitions of `pv`, oldest first.
    fn partitions(&self, pv: &str) -> Result<Vec<StoredPartition>>;

    /// Streams the events of `partitions` (oldest first) in one pass.
    fn open_partitions(
        &self,
        pv: &str,
        partitions: &[StoredPartition],
    ) -> Result<BoxedEventStream>;

    /// Fingerprints a partition's current content.
    fn fingerprint(&self, partition: &StoredPartition) -> Result<Fingerprint>;

    /// Copies a partition into `folder`, keeping the PV key layout.
    fn backup_partition(
        &self,
        pv: &str,
        partition: &StoredPartition,
        folder: &Path,
    ) -> Result<PathBuf>;

    /// Deletes a partition unless its size changed since it was listed.
    ///
    /// Returns false when the partition was left in place.
    fn delete_partition(&self, pv: &str, partition: &StoredPartition) -> Result<bool>;
}

/// Write side of an ETL stage.
///
/// Appends land in staged files that become visible only through
/// [`EtlDest::commit_staged`].
pub trait EtlDest: Send + Sync {
    /// Appends into staged partitions.
    fn stage_append(&self, pv: &str, stream: &mut dyn EventStream) -> Result<AppendSummary>;

    /// Publishes staged partitions and consolidates aged ones.
    fn commit_staged(&self, pv: &str, now: Timestamp) -> Result<()>;

    /// Removes staged partitions left by a failed append.
    fn discard_staged(&self, pv: &str) -> Result<()>;

    /// Folder holding this store's fingerprint ledger; `None` when it keeps no data.
    fn ledger_dir(&self) -> Option<PathBuf>;
}

/// Builds the store a configuration describes.
pub fn store_from_config(config: StoreConfig) -> Result<SharedStore> {
    config.validate()?;
    let store: SharedStore = match config.scheme {
        StoreScheme::Plain => Arc::new(PlainStore::new(config)?),
        StoreScheme::Blackhole => Arc::new(BlackholeStore::new(config)),
    };
    Ok(store)
}

/// Parses a store URL and builds the store.
pub fn store_from_url(url: &str) -> Result<SharedStore> {
    store_from_config(StoreConfig::parse(url)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_factory_picks_backend() {
        let temp_dir = TempDir::new().unwrap();
        let url = format!(
            "pb://localhost?name=STS&rootFolder={}&partitionGranularity=PARTITION_HOUR",
            temp_dir.path().display()
        );
        let plain = store_from_url(&url).unwrap();
        assert_eq!(plain.name(), "STS");
        assert!(plain.etl_source().is_some());
        assert!(plain.etl_dest().ledger_dir().is_some());

        let blackhole = store_from_url("blackhole://localhost?name=LTS").unwrap();
        assert_eq!(blackhole.name(), "LTS");
        assert!(blackhole.etl_source().is_none());
        assert!(blackhole.etl_dest().ledger_dir().is_none());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        assert_eq!(Fingerprint::of(b"abc"), Fingerprint::of(b"abc"));
        assert_ne!(Fingerprint::of(b"abc"), Fingerprint::of(b"abd"));
        assert_eq!(Fingerprint::of(b"abc").size, 3);
    }
}
