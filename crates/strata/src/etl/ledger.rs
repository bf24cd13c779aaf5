//! Fingerprint ledger: which source partitions a destination already holds.
//!
//! An entry is written once the migrated data is committed in the destination
//! and cleared once the source partition is deleted. A pass that finds an entry
//! matching the current content of a source partition skips the append and only
//! finishes the cleanup.

use crate::error::Result;
use crate::store::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Default ledger file name, relative to the destination root.
pub const DEFAULT_LEDGER_FILE: &str = ".etl_ledger.json";

const LEDGER_VERSION: u32 = 1;

// source store -> pv -> partition name -> fingerprint
type Entries = BTreeMap<String, BTreeMap<String, BTreeMap<String, Fingerprint>>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    entries: Entries,
}

/// A JSON ledger file shared by every job writing into one destination.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl Ledger {
    /// Opens a ledger, starting empty when the file is missing or unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(data) => match serde_json::from_slice::<LedgerFile>(&data) {
                Ok(file) => file.entries,
                Err(err) => {
                    warn!(
                        "Ignoring unreadable ETL ledger {}: {}",
                        path.display(),
                        err
                    );
                    Entries::new()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => Entries::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Returns the ledger file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the recorded fingerprint of a source partition.
    pub fn lookup(&self, source: &str, pv: &str, partition: &str) -> Option<Fingerprint> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(source)?.get(pv)?.get(partition).copied()
    }

    /// Records that a source partition with this fingerprint has been migrated.
    pub fn record(
        &self,
        source: &str,
        pv: &str,
        partition: &str,
        fingerprint: Fingerprint,
    ) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(source.to_string())
            .or_default()
            .entry(pv.to_string())
            .or_default()
            .insert(partition.to_string(), fingerprint);
        self.persist(&entries)?;
        debug!("Recorded {} of {} from {} in the ETL ledger", partition, pv, source);
        Ok(())
    }

    /// Forgets a source partition once it is deleted.
    pub fn clear(&self, source: &str, pv: &str, partition: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let Some(pvs) = entries.get_mut(source) else {
            return Ok(());
        };
        let Some(partitions) = pvs.get_mut(pv) else {
            return Ok(());
        };
        if partitions.remove(partition).is_none() {
            return Ok(());
        }
        if partitions.is_empty() {
            pvs.remove(pv);
        }
        if pvs.is_empty() {
            entries.remove(source);
        }
        self.persist(&entries)
    }

    /// Returns the number of recorded partitions.
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .values()
            .flat_map(|pvs| pvs.values())
            .map(BTreeMap::len)
            .sum()
    }

    /// Returns true when nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, entries: &Entries) -> Result<()> {
        let file = LedgerFile {
            version: LEDGER_VERSION,
            entries: entries.clone(),
        };
        let data = serde_json::to_vec_pretty(&file)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&data)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
