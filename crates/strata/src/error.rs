//! Error and Result types for Strata store and ETL operations.

use std::fmt;
use std::io;
use thiserror::Error;

/// A convenience `Result` type for Strata operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Phase of an ETL job in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EtlPhase {
    /// Listing eligible partitions in the source store.
    Discover,
    /// Opening or wrapping the source stream.
    Transform,
    /// Writing into the destination store.
    Append,
    /// Removing (or backing up) the source partition.
    Delete,
}

impl fmt::Display for EtlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discover => "discover",
            Self::Transform => "transform",
            Self::Append => "append",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// The error type for store, search and ETL operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// A partition file could not be decoded.
    #[error("Malformed partition {path}: {reason}")]
    MalformedPartition {
        /// Path (or container entry) of the partition.
        path: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Line checksum does not match expected value.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Expected CRC32 checksum.
        expected: u32,
        /// Actual computed CRC32 checksum.
        actual: u32,
    },

    /// Time-position search exhausted its probe budget.
    #[error("Search did not converge after {iterations} probes (min {min}, mid {mid}, max {max})")]
    SearchNonConvergence {
        /// Probe budget that was exhausted.
        iterations: usize,
        /// Lower byte bound when the search gave up.
        min: u64,
        /// Last probe offset.
        mid: u64,
        /// Upper byte bound when the search gave up.
        max: u64,
    },

    /// Reading or comparing the lines at a probe offset failed.
    #[error("Search probe failed (min {min}, mid {mid}, max {max}): {source}")]
    SearchProbe {
        /// Lower byte bound at the failing probe.
        min: u64,
        /// Failing probe offset.
        mid: u64,
        /// Upper byte bound at the failing probe.
        max: u64,
        /// Underlying failure.
        #[source]
        source: Box<StoreError>,
    },

    /// A timestamp outside the representable range was supplied.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A store URL could not be parsed.
    #[error("Invalid store URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A partition file name does not match the store granularity.
    #[error("Invalid partition name {name}: {reason}")]
    InvalidPartitionName {
        /// File name (without directories).
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Unknown post-processor identifier.
    #[error("Unknown post-processor: {0}")]
    UnknownPostProcessor(String),

    /// Unknown sample kind identifier.
    #[error("Unknown sample kind: {0}")]
    UnknownSampleKind(String),

    /// A sample value could not be converted.
    #[error("Conversion error: {0}")]
    ConversionError(String),

    /// Appending into a partition that holds data for another PV.
    #[error("Partition {path} holds data for {found}, not {expected}")]
    PvMismatch {
        /// Path of the partition.
        path: String,
        /// PV the caller is appending.
        expected: String,
        /// PV recorded in the partition header.
        found: String,
    },

    /// The named store is not part of the PV's store chain.
    #[error("Unknown store {store} for PV {pv}")]
    UnknownStore {
        /// PV name.
        pv: String,
        /// Store name that was requested.
        store: String,
    },

    /// An ETL job failed.
    #[error("ETL {phase} failed for {pv} ({source_store} -> {dest_store}): {reason}")]
    EtlError {
        /// PV name.
        pv: String,
        /// Source store name.
        source_store: String,
        /// Destination store name.
        dest_store: String,
        /// Phase that failed.
        phase: EtlPhase,
        /// Human-readable reason.
        reason: String,
    },

    /// Error from the per-PV zip container.
    #[error("Container error: {0}")]
    ContainerError(#[from] zip::result::ZipError),

    /// Error serializing or parsing JSON state.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl StoreError {
    pub(crate) fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPartition {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors that describe damaged partition data rather than
    /// an environmental failure.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::MalformedPartition { .. } | Self::ChecksumMismatch { .. }
        )
    }
}
