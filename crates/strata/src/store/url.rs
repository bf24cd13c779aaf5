//! Store URLs: the serialized form of one store-chain entry.
//!
//! ```text
//! pb://localhost?name=STS&rootFolder=/data/sts&partitionGranularity=PARTITION_HOUR&hold=2&gather=1
//! blackhole://localhost?name=DISCARD
//! ```

use crate::error::{Result, StoreError};
use crate::event::SampleKind;
use crate::partition::PartitionGranularity;
use crate::postprocess;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

/// Backend selected by the URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreScheme {
    /// Partitioned files on a local filesystem (`pb://`).
    Plain,
    /// Accepts and discards everything (`blackhole://`).
    Blackhole,
}

impl StoreScheme {
    /// Returns the URL scheme.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "pb",
            Self::Blackhole => "blackhole",
        }
    }
}

/// How aged partitions of one PV are consolidated on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMode {
    /// Every partition stays a loose file.
    #[default]
    None,
    /// Partitions older than the current one move into one zip container per PV.
    ZipPerPv,
}

impl CompressionMode {
    /// Returns the URL value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::ZipPerPv => "ZIP_PER_PV",
        }
    }
}

impl FromStr for CompressionMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NONE" => Ok(Self::None),
            "ZIP_PER_PV" => Ok(Self::ZipPerPv),
            other => Err(StoreError::ConfigError(format!(
                "unknown compression mode {}",
                other
            ))),
        }
    }
}

/// Effective configuration of one store.
///
/// # Examples
/// ```rust,ignore
/// use alopex_strata::store::StoreConfig;
///
/// let config: StoreConfig =
///     "pb://localhost?name=MTS&rootFolder=/data/mts&partitionGranularity=PARTITION_DAY".parse()?;
/// assert_eq!(config.to_url().parse::<StoreConfig>()?, config);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Backend.
    pub scheme: StoreScheme,
    /// Store name, unique within a store chain.
    pub name: String,
    /// Root folder (plain stores only).
    pub root_folder: Option<PathBuf>,
    /// Partition granularity.
    pub granularity: PartitionGranularity,
    /// Partitions to keep before ETL starts moving data out.
    pub hold: u32,
    /// Partitions moved at once once `hold` is reached.
    pub gather: u32,
    /// Container consolidation mode.
    pub compression: CompressionMode,
    /// Reduction applied to data migrated into this store.
    pub post_processor: Option<String>,
    /// Sample kind data migrated into this store is converted to.
    pub conversion: Option<SampleKind>,
    /// Named flag that must be true for migrated data to be kept.
    pub etl_into_store_if: Option<String>,
    /// Named flag that must be true for data to migrate out of this store.
    pub etl_outof_store_if: Option<String>,
    /// Folder partitions are copied to before ETL deletes them.
    pub backup_folder: Option<PathBuf>,
    /// Drain this store into the next one when the appliance shuts down.
    pub consolidate_on_shutdown: bool,
}

impl StoreConfig {
    /// Creates a plain store configuration.
    pub fn plain(
        name: impl Into<String>,
        root_folder: impl Into<PathBuf>,
        granularity: PartitionGranularity,
    ) -> Self {
        Self {
            scheme: StoreScheme::Plain,
            name: name.into(),
            root_folder: Some(root_folder.into()),
            granularity,
            hold: 0,
            gather: 0,
            compression: CompressionMode::None,
            post_processor: None,
            conversion: None,
            etl_into_store_if: None,
            etl_outof_store_if: None,
            backup_folder: None,
            consolidate_on_shutdown: false,
        }
    }

    /// Creates a black-hole store configuration.
    pub fn blackhole(name: impl Into<String>) -> Self {
        Self {
            scheme: StoreScheme::Blackhole,
            root_folder: None,
            ..Self::plain(name, PathBuf::new(), PartitionGranularity::Year)
        }
    }

    /// Sets hold and gather partition counts.
    pub fn with_hold_and_gather(mut self, hold: u32, gather: u32) -> Self {
        self.hold = hold;
        self.gather = gather;
        self
    }

    /// Sets the compression mode.
    pub fn with_compression(mut self, compression: CompressionMode) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the reduction directive.
    pub fn with_post_processor(mut self, post_processor: impl Into<String>) -> Self {
        self.post_processor = Some(post_processor.into());
        self
    }

    /// Sets the type-conversion directive.
    pub fn with_conversion(mut self, kind: SampleKind) -> Self {
        self.conversion = Some(kind);
        self
    }

    /// Sets the conditional-accept flag.
    pub fn with_etl_into_store_if(mut self, flag: impl Into<String>) -> Self {
        self.etl_into_store_if = Some(flag.into());
        self
    }

    /// Sets the flag gating migration out of this store.
    pub fn with_etl_outof_store_if(mut self, flag: impl Into<String>) -> Self {
        self.etl_outof_store_if = Some(flag.into());
        self
    }

    /// Enables backup-before-delete into the given folder.
    pub fn with_backup_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.backup_folder = Some(folder.into());
        self
    }

    /// Marks the store for consolidation on shutdown.
    pub fn with_consolidate_on_shutdown(mut self, consolidate: bool) -> Self {
        self.consolidate_on_shutdown = consolidate;
        self
    }

    /// Parses and validates a store URL.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |reason: String| StoreError::InvalidUrl {
            url: text.to_string(),
            reason,
        };

        let url = Url::parse(text).map_err(|err| invalid(err.to_string()))?;
        let scheme = match url.scheme() {
            "pb" => StoreScheme::Plain,
            "blackhole" => StoreScheme::Blackhole,
            other => return Err(invalid(format!("unsupported scheme {}", other))),
        };

        let mut config = Self::plain(String::new(), PathBuf::new(), PartitionGranularity::Hour);
        config.scheme = scheme;
        config.root_folder = None;
        let mut granularity_seen = false;

        for (key, value) in url.query_pairs() {
            let value = value.into_owned();
            match key.as_ref() {
                "name" => config.name = value,
                "rootFolder" => config.root_folder = Some(PathBuf::from(value)),
                "partitionGranularity" => {
                    config.granularity = value.parse().map_err(|_| {
                        invalid(format!("unknown partition granularity {}", value))
                    })?;
                    granularity_seen = true;
                }
                "hold" => {
                    config.hold = value
                        .parse()
                        .map_err(|_| invalid(format!("hold {} is not a count", value)))?
                }
                "gather" => {
                    config.gather = value
                        .parse()
                        .map_err(|_| invalid(format!("gather {} is not a count", value)))?
                }
                "compress" => {
                    config.compression = value
                        .parse()
                        .map_err(|err: StoreError| invalid(err.to_string()))?
                }
                "pp" => config.post_processor = Some(value),
                "convert" => {
                    config.conversion = Some(
                        value
                            .parse()
                            .map_err(|err: StoreError| invalid(err.to_string()))?,
                    )
                }
                "etlIntoStoreIf" => config.etl_into_store_if = Some(value),
                "etlOutofStoreIf" => config.etl_outof_store_if = Some(value),
                "backupFolder" => config.backup_folder = Some(PathBuf::from(value)),
                "consolidateOnShutdown" => {
                    config.consolidate_on_shutdown = value.parse().map_err(|_| {
                        invalid(format!("consolidateOnShutdown {} is not a boolean", value))
                    })?
                }
                other => return Err(invalid(format!("unknown parameter {}", other))),
            }
        }

        if config.name.is_empty() {
            return Err(invalid("missing name".to_string()));
        }
        if scheme == StoreScheme::Plain {
            if config.root_folder.is_none() {
                return Err(invalid("missing rootFolder".to_string()));
            }
            if !granularity_seen {
                return Err(invalid("missing partitionGranularity".to_string()));
            }
        }
        config.validate().map_err(|err| invalid(err.to_string()))?;
        Ok(config)
    }

    /// Checks directives that must be resolvable before a store is built.
    pub fn validate(&self) -> Result<()> {
        if self.post_processor.is_some() && self.conversion.is_some() {
            return Err(StoreError::ConfigError(
                "a store cannot both reduce and convert migrated data".to_string(),
            ));
        }
        if let Some(spec) = &self.post_processor {
            postprocess::post_processor_for(spec)?;
        }
        if self.hold < self.gather {
            return Err(StoreError::ConfigError(format!(
                "hold {} is smaller than gather {}",
                self.hold, self.gather
            )));
        }
        Ok(())
    }

    /// Emits the canonical URL for this configuration.
    pub fn to_url(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("name", &self.name);
        if self.scheme == StoreScheme::Plain {
            if let Some(root) = &self.root_folder {
                query.append_pair("rootFolder", &root.to_string_lossy());
            }
            query.append_pair("partitionGranularity", self.granularity.as_str());
            if self.hold != 0 || self.gather != 0 {
                query.append_pair("hold", &self.hold.to_string());
                query.append_pair("gather", &self.gather.to_string());
            }
            if self.compression != CompressionMode::None {
                query.append_pair("compress", self.compression.as_str());
            }
        }
        if let Some(pp) = &self.post_processor {
            query.append_pair("pp", pp);
        }
        if let Some(kind) = self.conversion {
            query.append_pair("convert", kind.as_str());
        }
        if let Some(flag) = &self.etl_into_store_if {
            query.append_pair("etlIntoStoreIf", flag);
        }
        if let Some(flag) = &self.etl_outof_store_if {
            query.append_pair("etlOutofStoreIf", flag);
        }
        if let Some(folder) = &self.backup_folder {
            query.append_pair("backupFolder", &folder.to_string_lossy());
        }
        if self.consolidate_on_shutdown {
            query.append_pair("consolidateOnShutdown", "true");
        }
        format!("{}://localhost?{}", self.scheme.as_str(), query.finish())
    }
}

impl FromStr for StoreConfig {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}
