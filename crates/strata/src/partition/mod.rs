//! Partition model: granularity, boundary arithmetic and file layout.

pub mod granularity;
pub mod layout;

pub use granularity::{PartitionGranularity, PartitionRange};
pub use layout::{
    DefaultPvNameToKey, PartitionFile, PartitionLayout, PvNameToKey, CONTAINER_SUFFIX,
    PARTITION_EXTENSION, STAGED_EXTENSION,
};
