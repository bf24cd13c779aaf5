//! Per-PV zip container holding aged partitions.

use crate::error::Result;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// A zip file with one entry per partition, named like the loose partition file.
///
/// Containers are rewritten as a whole into a temporary sibling and swapped in by
/// rename, so a reader always sees either the old or the new container.
#[derive(Debug, Clone)]
pub struct PartitionContainer {
    path: PathBuf,
}

impl PartitionContainer {
    /// Creates a handle; the file need not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the container path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the container file exists.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Lists entry names, sorted. A missing container has no entries.
    pub fn entry_names(&self) -> Result<Vec<String>> {
        let Some(archive) = self.open()? else {
            return Ok(Vec::new());
        };
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        Ok(names)
    }

    /// Lists entry names with their uncompressed sizes, sorted by name.
    pub fn entries(&self) -> Result<Vec<(String, u64)>> {
        let Some(mut archive) = self.open()? else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive.by_index(index)?;
            entries.push((entry.name().to_string(), entry.size()));
        }
        entries.sort();
        Ok(entries)
    }

    /// Reads one entry into memory.
    pub fn read_entry(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let Some(mut archive) = self.open()? else {
            return Ok(None);
        };
        let mut entry = match archive.by_name(name) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        Ok(Some(data))
    }

    /// Rewrites the container, adding (or replacing) entries from loose files and
    /// dropping the named entries.
    ///
    /// A container left without entries is removed.
    pub fn update(&self, upserts: &[(String, PathBuf)], removals: &[String]) -> Result<()> {
        let replaced: BTreeSet<&str> = upserts
            .iter()
            .map(|(name, _)| name.as_str())
            .chain(removals.iter().map(String::as_str))
            .collect();

        let tmp_path = self.tmp_path();
        let mut kept = 0usize;
        {
            let mut writer = ZipWriter::new(File::create(&tmp_path)?);
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

            if let Some(mut archive) = self.open()? {
                for index in 0..archive.len() {
                    let mut entry = archive.by_index(index)?;
                    if replaced.contains(entry.name()) {
                        continue;
                    }
                    writer.start_file(entry.name().to_string(), options)?;
                    io::copy(&mut entry, &mut writer)?;
                    kept += 1;
                }
            }

            for (name, source) in upserts {
                writer.start_file(name.clone(), options)?;
                let mut file = File::open(source)?;
                io::copy(&mut file, &mut writer)?;
                kept += 1;
            }

            let mut file = writer.finish()?;
            file.flush()?;
            file.sync_all()?;
        }

        if kept == 0 {
            fs::remove_file(&tmp_path)?;
            self.remove()?;
            debug!("Removed empty container {}", self.path.display());
            return Ok(());
        }
        fs::rename(&tmp_path, &self.path)?;
        debug!(
            "Rewrote container {} with {} entries",
            self.path.display(),
            kept
        );
        Ok(())
    }

    /// Removes the container file if present.
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn open(&self) -> Result<Option<ZipArchive<File>>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(ZipArchive::new(file)?))
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_container_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let container = PartitionContainer::new(temp_dir.path().join("DEF:_pb.zip"));
        assert!(!container.exists());
        assert!(container.entry_names().unwrap().is_empty());
        assert!(container.read_entry("DEF:2012.pb").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replace_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let container = PartitionContainer::new(temp_dir.path().join("DEF:_pb.zip"));
        let first = temp_dir.path().join("DEF:2012_01.pb");
        let second = temp_dir.path().join("DEF:2012_02.pb");
        fs::write(&first, b"january").unwrap();
        fs::write(&second, b"february").unwrap();

        container
            .update(
                &[
                    ("DEF:2012_02.pb".to_string(), second.clone()),
                    ("DEF:2012_01.pb".to_string(), first.clone()),
                ],
                &[],
            )
            .unwrap();
        assert_eq!(
            container.entry_names().unwrap(),
            vec!["DEF:2012_01.pb", "DEF:2012_02.pb"]
        );

        fs::write(&first, b"january, again").unwrap();
        container
            .update(&[("DEF:2012_01.pb".to_string(), first)], &[])
            .unwrap();
        assert_eq!(
            container.read_entry("DEF:2012_01.pb").unwrap().unwrap(),
            b"january, again"
        );
        assert_eq!(
            container.read_entry("DEF:2012_02.pb").unwrap().unwrap(),
            b"february"
        );

        container
            .update(
                &[],
                &["DEF:2012_01.pb".to_string(), "DEF:2012_02.pb".to_string()],
            )
            .unwrap();
        assert!(!container.exists());
        assert!(!temp_dir.path().join("DEF:_pb.zip.tmp").exists());
    }
}
