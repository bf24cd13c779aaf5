//! Strata - Alopex tiered event archive
//!
//! This crate stores time-ordered events of named channels (PVs) in
//! time-partitioned files and migrates aged partitions down a chain of stores,
//! for example short-term (hourly) to medium-term (daily) to long-term.
//!
//! # Components
//!
//! - [`store::PlainStore`]: Partitioned file store with an optional zip container per PV
//! - [`search::PositionSearch`]: Bounded binary search for a time inside a partition file
//! - [`etl::EtlExecutor`]: Candidate discovery, append, fingerprint ledger and source cleanup
//! - [`postprocess`]: Reductions and type conversions applied while data migrates
//! - [`merge::MergeDedupStream`]: Sorted union of two event streams
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_strata::config::{EtlOptions, StaticConfigService};
//! use alopex_strata::etl::EtlExecutor;
//! use alopex_strata::Timestamp;
//!
//! let service = Arc::new(StaticConfigService::new());
//! service.register_pv(
//!     "ABC:DEF",
//!     &[
//!         "pb://localhost?name=STS&rootFolder=/data/sts&partitionGranularity=PARTITION_HOUR",
//!         "pb://localhost?name=MTS&rootFolder=/data/mts&partitionGranularity=PARTITION_DAY&pp=mean_600",
//!     ],
//! )?;
//!
//! let executor = EtlExecutor::new(service.clone(), EtlOptions::default());
//! let summary = executor.run_etl(Timestamp::now());
//! println!("{} partitions moved", summary.partitions_removed());
//! ```

#![deny(missing_docs)]

pub mod codec;
pub mod config;
pub mod error;
pub mod etl;
pub mod event;
pub mod logging;
pub mod merge;
pub mod partition;
pub mod postprocess;
pub mod search;
pub mod store;
pub mod time;

pub use error::{EtlPhase, Result, StoreError};
pub use event::{Event, EventStream, SampleKind, SampleValue, StreamDescription};
pub use partition::{PartitionGranularity, PartitionRange};
pub use store::{store_from_url, SharedStore, StoragePlugin, StoreConfig};
pub use time::Timestamp;
