//! Appliance configuration.
//!
//! The ETL executor reads PV registrations, store chains, named flags and gating
//! intervals through [`ConfigService`]. [`StaticConfigService`] keeps all of that
//! in memory and is built either from a TOML [`ApplianceConfig`] or
//! programmatically.
//!
//! ```toml
//! [etl]
//! parallelism = 4
//! cadence_secs = 300
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [flags]
//! keepLTS = true
//!
//! [[pv]]
//! name = "ABC:DEF"
//! stores = [
//!     "pb://localhost?name=STS&rootFolder=/data/sts&partitionGranularity=PARTITION_HOUR",
//!     "pb://localhost?name=MTS&rootFolder=/data/mts&partitionGranularity=PARTITION_DAY",
//! ]
//!
//! [[gating]]
//! scope = "ABC:DEF"
//! start = "2012-01-01T00:00:00Z"
//! end = "2012-01-02T00:00:00Z"
//! ```

use crate::error::{Result, StoreError};
use crate::etl::{GatingIntervals, NamedFlags, DEFAULT_LEDGER_FILE};
use crate::store::{store_from_config, SharedStore, StoreConfig};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Options of the ETL executor and scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlOptions {
    /// Worker threads per pass.
    pub parallelism: usize,
    /// Seconds between scheduled passes.
    pub cadence_secs: u64,
    /// Ledger file name, relative to each destination root.
    pub ledger_file: String,
}

impl Default for EtlOptions {
    fn default() -> Self {
        Self {
            parallelism: 4,
            cadence_secs: 300,
            ledger_file: DEFAULT_LEDGER_FILE.to_string(),
        }
    }
}

impl EtlOptions {
    /// Sets the worker count (at least one).
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Sets the scheduler cadence.
    pub fn with_cadence_secs(mut self, cadence_secs: u64) -> Self {
        self.cadence_secs = cadence_secs;
        self
    }

    /// Sets the ledger file name.
    pub fn with_ledger_file(mut self, ledger_file: impl Into<String>) -> Self {
        self.ledger_file = ledger_file.into();
        self
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive, overridden by `RUST_LOG`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// One archived PV and its store chain, newest tier first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvEntry {
    /// PV name.
    pub name: String,
    /// Store URLs in chain order.
    pub stores: Vec<String>,
}

/// A gating interval, with ISO-8601 bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatingEntry {
    /// Scope, usually a PV name.
    pub scope: String,
    /// Inclusive start.
    pub start: String,
    /// Exclusive end.
    pub end: String,
}

/// Contents of the appliance TOML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplianceConfig {
    /// ETL options.
    pub etl: EtlOptions,
    /// Logging options.
    pub logging: LoggingConfig,
    /// Initial named flag values.
    pub flags: BTreeMap<String, bool>,
    /// Archived PVs.
    #[serde(rename = "pv")]
    pub pvs: Vec<PvEntry>,
    /// Initial gating intervals.
    pub gating: Vec<GatingEntry>,
}

impl ApplianceConfig {
    /// Loads a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StoreError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parses TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration without touching the filesystem.
    pub fn validate(&self) -> Result<()> {
        if self.etl.parallelism == 0 {
            return Err(StoreError::ConfigError(
                "etl.parallelism must be at least 1".to_string(),
            ));
        }
        for pv in &self.pvs {
            let mut names = Vec::with_capacity(pv.stores.len());
            for url in &pv.stores {
                let store = StoreConfig::parse(url)?;
                store.validate()?;
                if names.contains(&store.name) {
                    return Err(StoreError::ConfigError(format!(
                        "store {} appears twice in the chain of {}",
                        store.name, pv.name
                    )));
                }
                names.push(store.name);
            }
        }
        for gating in &self.gating {
            Timestamp::parse_iso8601(&gating.start)?;
            Timestamp::parse_iso8601(&gating.end)?;
        }
        Ok(())
    }
}

/// Configuration state the ETL engine consults.
pub trait ConfigService: Send + Sync {
    /// Names of every PV archived by this appliance.
    fn pv_names(&self) -> Vec<String>;

    /// Store chain of `pv`, newest tier first.
    fn store_chain(&self, pv: &str) -> Option<Vec<SharedStore>>;

    /// Named boolean flags.
    fn named_flags(&self) -> &NamedFlags;

    /// Retention gating intervals.
    fn gating(&self) -> &GatingIntervals;
}

/// In-memory [`ConfigService`].
///
/// Store instances are shared between PVs whose chains name the same URL.
#[derive(Default)]
pub struct StaticConfigService {
    chains: RwLock<BTreeMap<String, Vec<SharedStore>>>,
    stores: Mutex<HashMap<String, SharedStore>>,
    flags: NamedFlags,
    gating: GatingIntervals,
}

impl StaticConfigService {
    /// Creates an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the service an appliance file describes.
    pub fn from_config(config: &ApplianceConfig) -> Result<Self> {
        config.validate()?;
        let service = Self::new();
        for (name, value) in &config.flags {
            service.flags.set(name, *value);
        }
        for gating in &config.gating {
            let start = Timestamp::parse_iso8601(&gating.start)?.epoch_millis();
            let end = Timestamp::parse_iso8601(&gating.end)?.epoch_millis();
            if !service.gating.keep(&gating.scope, start, end) {
                warn!(
                    "Ignoring empty gating interval {}..{} for {}",
                    gating.start, gating.end, gating.scope
                );
            }
        }
        for pv in &config.pvs {
            service.register_pv(&pv.name, &pv.stores)?;
        }
        info!("Loaded {} PVs", config.pvs.len());
        Ok(service)
    }

    /// Registers `pv` with a chain of store URLs.
    pub fn register_pv<S: AsRef<str>>(&self, pv: &str, urls: &[S]) -> Result<()> {
        let mut chain = Vec::with_capacity(urls.len());
        for url in urls {
            chain.push(self.store_for(url.as_ref())?);
        }
        self.register_pv_stores(pv, chain);
        Ok(())
    }

    /// Registers `pv` with already-built stores.
    pub fn register_pv_stores(&self, pv: &str, chain: Vec<SharedStore>) {
        let mut chains = self.chains.write().unwrap_or_else(|e| e.into_inner());
        chains.insert(pv.to_string(), chain);
    }

    /// Forgets `pv`. Returns true when it was registered.
    pub fn remove_pv(&self, pv: &str) -> bool {
        let mut chains = self.chains.write().unwrap_or_else(|e| e.into_inner());
        chains.remove(pv).is_some()
    }

    fn store_for(&self, url: &str) -> Result<SharedStore> {
        let config = StoreConfig::parse(url)?;
        let key = config.to_url();
        let mut stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(store) = stores.get(&key) {
            return Ok(store.clone());
        }
        let store = store_from_config(config)?;
        stores.insert(key, store.clone());
        Ok(store)
    }
}

impl ConfigService for StaticConfigService {
    fn pv_names(&self) -> Vec<String> {
        let chains = self.chains.read().unwrap_or_else(|e| e.into_inner());
        chains.keys().cloned().collect()
    }

    fn store_chain(&self, pv: &str) -> Option<Vec<SharedStore>> {
        let chains = self.chains.read().unwrap_or_else(|e| e.into_inner());
        chains.get(pv).cloned()
    }

    fn named_flags(&self) -> &NamedFlags {
        &self.flags
    }

    fn gating(&self) -> &GatingIntervals {
        &self.gating
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn appliance_toml(root: &Path) -> String {
        format!(
            r#"
[etl]
parallelism = 2
cadence_secs = 60

[logging]
level = "debug"
format = "json"

[flags]
keepLTS = true

[[pv]]
name = "ABC:DEF"
stores = [
    "pb://localhost?name=STS&rootFolder={root}/sts&partitionGranularity=PARTITION_HOUR",
    "pb://localhost?name=MTS&rootFolder={root}/mts&partitionGranularity=PARTITION_DAY",
    "blackhole://localhost?name=LTS",
]

[[pv]]
name = "XYZ:DEF"
stores = [
    "pb://localhost?name=STS&rootFolder={root}/sts&partitionGranularity=PARTITION_HOUR",
]

[[gating]]
scope = "ABC:DEF"
start = "2012-01-01T00:00:00Z"
end = "2012-01-02T00:00:00Z"
"#,
            root = root.display()
        )
    }

    #[test]
    fn test_load_appliance_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("strata.toml");
        std::fs::write(&path, appliance_toml(temp_dir.path())).unwrap();

        let config = ApplianceConfig::load(&path).unwrap();
        assert_eq!(config.etl.parallelism, 2);
        assert_eq!(config.etl.cadence_secs, 60);
        assert_eq!(config.etl.ledger_file, DEFAULT_LEDGER_FILE);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.pvs.len(), 2);
        assert_eq!(config.flags.get("keepLTS"), Some(&true));

        let service = StaticConfigService::from_config(&config).unwrap();
        assert_eq!(service.pv_names(), vec!["ABC:DEF", "XYZ:DEF"]);
        let chain = service.store_chain("ABC:DEF").unwrap();
        let names: Vec<&str> = chain.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["STS", "MTS", "LTS"]);
        assert!(service.named_flags().get("keepLTS"));
        assert_eq!(service.gating().intervals("ABC:DEF").len(), 1);

        // Both PVs share one STS instance.
        let other = service.store_chain("XYZ:DEF").unwrap();
        assert!(Arc::ptr_eq(&chain[0], &other[0]));
    }

    #[test]
    fn test_defaults_for_missing_sections() {
        let config = ApplianceConfig::from_toml_str("").unwrap();
        assert_eq!(config, ApplianceConfig::default());
        assert_eq!(config.etl.parallelism, 4);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_rejects_bad_configuration() {
        assert!(matches!(
            ApplianceConfig::from_toml_str("[etl]\nparallelism = 0\n"),
            Err(StoreError::ConfigError(_))
        ));
        let bad_scheme = "[[pv]]\nname = \"A\"\nstores = [\"ftp://x\"]\n";
        assert!(ApplianceConfig::from_toml_str(bad_scheme).is_err());
        assert!(matches!(
            ApplianceConfig::from_toml_str("[etl\n"),
            Err(StoreError::ConfigError(_))
        ));
        let duplicate = r#"
[[pv]]
name = "A"
stores = ["blackhole://localhost?name=X", "blackhole://localhost?name=X"]
"#;
        assert!(ApplianceConfig::from_toml_str(duplicate).is_err());
    }

    #[test]
    fn test_register_and_remove_pv() {
        let service = StaticConfigService::new();
        service
            .register_pv("ABC:DEF", &["blackhole://localhost?name=LTS"])
            .unwrap();
        assert!(service.store_chain("ABC:DEF").is_some());
        assert!(service.remove_pv("ABC:DEF"));
        assert!(!service.remove_pv("ABC:DEF"));
        assert!(service.pv_names().is_empty());
    }
}
