//! On-disk layout of partition files: PV-name-to-key mapping and path resolution.

use crate::error::Result;
use crate::partition::{PartitionGranularity, PartitionRange};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Extension of committed partition files.
pub const PARTITION_EXTENSION: &str = ".pb";

/// Extension of partition files staged by an ETL append and not yet committed.
pub const STAGED_EXTENSION: &str = ".pbappend";

/// Suffix appended to a PV key to name its per-PV container.
pub const CONTAINER_SUFFIX: &str = "_pb.zip";

/// Maps a PV name onto the relative key used to name its partition files.
///
/// The key may contain `/` to spread PVs over directories; the final component
/// is used as the file name prefix and must end with a terminator so that one
/// PV's prefix is never a prefix of another's.
pub trait PvNameToKey: Send + Sync + fmt::Debug {
    /// Returns the key for a PV.
    fn key_for(&self, pv: &str) -> String;
}

/// Default mapping: site separators become directories and the key ends with `:`.
///
/// # Examples
/// ```rust,ignore
/// use alopex_strata::partition::{DefaultPvNameToKey, PvNameToKey};
///
/// let mapping = DefaultPvNameToKey::default();
/// assert_eq!(mapping.key_for("ABC:DEF"), "ABC/DEF:");
/// ```
#[derive(Debug, Clone)]
pub struct DefaultPvNameToKey {
    separators: Vec<char>,
    terminator: char,
}

impl Default for DefaultPvNameToKey {
    fn default() -> Self {
        Self {
            separators: vec![':', '-', '.', '{', '}'],
            terminator: ':',
        }
    }
}

impl DefaultPvNameToKey {
    /// Creates a mapping with custom separators and terminator.
    pub fn new(separators: impl Into<Vec<char>>, terminator: char) -> Self {
        Self {
            separators: separators.into(),
            terminator,
        }
    }

    /// Returns the terminator appended to every key.
    pub fn terminator(&self) -> char {
        self.terminator
    }
}

impl PvNameToKey for DefaultPvNameToKey {
    fn key_for(&self, pv: &str) -> String {
        let mut key: String = pv
            .chars()
            .map(|c| if self.separators.contains(&c) { '/' } else { c })
            .collect();
        key.push(self.terminator);
        key
    }
}

/// A partition file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFile {
    /// Full path of the file.
    pub path: PathBuf,
    /// File name without directories.
    pub name: String,
    /// Time range covered by the partition.
    pub range: PartitionRange,
}

/// Resolves partition file paths for one store root and granularity.
///
/// # Examples
/// ```rust,ignore
/// use alopex_strata::partition::{PartitionGranularity, PartitionLayout};
///
/// let layout = PartitionLayout::new("/data/sts", PartitionGranularity::Hour);
/// let path = layout.partition_path("ABC:DEF", 1_325_386_800, ".pb");
/// assert!(path.ends_with("ABC/DEF:2012_01_01_03.pb"));
/// ```
#[derive(Debug, Clone)]
pub struct PartitionLayout {
    root: PathBuf,
    granularity: PartitionGranularity,
    key_mapping: Arc<dyn PvNameToKey>,
}

impl PartitionLayout {
    /// Creates a layout using the default PV-name-to-key mapping.
    pub fn new(root: impl AsRef<Path>, granularity: PartitionGranularity) -> Self {
        Self::with_key_mapping(root, granularity, Arc::new(DefaultPvNameToKey::default()))
    }

    /// Creates a layout with a custom PV-name-to-key mapping.
    pub fn with_key_mapping(
        root: impl AsRef<Path>,
        granularity: PartitionGranularity,
        key_mapping: Arc<dyn PvNameToKey>,
    ) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            granularity,
            key_mapping,
        }
    }

    /// Returns the store root folder.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the partition granularity.
    pub fn granularity(&self) -> PartitionGranularity {
        self.granularity
    }

    /// Returns the key for a PV.
    pub fn pv_key(&self, pv: &str) -> String {
        self.key_mapping.key_for(pv)
    }

    /// Returns the directory holding a PV's partitions and the file name prefix.
    pub fn pv_dir_and_prefix(&self, pv: &str) -> (PathBuf, String) {
        let key = self.pv_key(pv);
        match key.rsplit_once('/') {
            Some((dirs, prefix)) => (self.root.join(dirs), prefix.to_string()),
            None => (self.root.clone(), key),
        }
    }

    /// Builds the path of the partition containing `epoch_seconds`.
    pub fn partition_path(&self, pv: &str, epoch_seconds: i64, extension: &str) -> PathBuf {
        let (dir, prefix) = self.pv_dir_and_prefix(pv);
        dir.join(format!(
            "{}{}{}",
            prefix,
            self.granularity.partition_label(epoch_seconds),
            extension
        ))
    }

    /// Returns the path of the per-PV container.
    pub fn container_path(&self, pv: &str) -> PathBuf {
        let (dir, prefix) = self.pv_dir_and_prefix(pv);
        dir.join(format!("{}{}", prefix, CONTAINER_SUFFIX))
    }

    /// Parses a file name of this PV into the partition range it covers.
    pub fn parse_file_name(
        &self,
        prefix: &str,
        name: &str,
        extension: &str,
    ) -> Option<Result<PartitionRange>> {
        let label = name.strip_prefix(prefix)?.strip_suffix(extension)?;
        Some(self.granularity.parse_label(label))
    }

    /// Lists every partition file of a PV with the given extension, sorted by name.
    ///
    /// Names that do not parse for this granularity are skipped with a warning.
    pub fn list_partition_files(&self, pv: &str, extension: &str) -> Result<Vec<PartitionFile>> {
        let (dir, prefix) = self.pv_dir_and_prefix(pv);
        let mut files = Vec::new();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("No folder {} for pv {}", dir.display(), pv);
                return Ok(files);
            }
            Err(err) => return Err(err.into()),
        };

        for entry in entries {
            let entry = entry?;
            let name = match entry.file_name().to_str() {
                Some(name) => name.to_string(),
                None => continue,
            };
            match self.parse_file_name(&prefix, &name, extension) {
                Some(Ok(range)) => {
                    if entry.file_type()?.is_file() {
                        files.push(PartitionFile {
                            path: entry.path(),
                            name,
                            range,
                        });
                    }
                }
                Some(Err(err)) => {
                    warn!("Skipping file {} for pv {}: {}", name, pv, err);
                }
                None => {}
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Lists partition files that hold data within `[start, end]` (epoch seconds, inclusive).
    pub fn paths_with_data(
        &self,
        pv: &str,
        start: i64,
        end: i64,
        extension: &str,
    ) -> Result<Vec<PartitionFile>> {
        let mut files = self.list_partition_files(pv, extension)?;
        files.retain(|file| file.range.intersects(start, end));
        Ok(files)
    }

    /// Lists partition files that lie entirely before the partition containing `now`.
    pub fn paths_before_current_partition(
        &self,
        pv: &str,
        now: i64,
        extension: &str,
    ) -> Result<Vec<PartitionFile>> {
        let end = self.granularity.previous_partition_last_second(now);
        self.paths_with_data(pv, i64::MIN, end, extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const T_2012_01_01_03: i64 = 1_325_386_800;

    #[test]
    fn test_default_key_mapping() {
        let mapping = DefaultPvNameToKey::default();
        assert_eq!(mapping.key_for("ABC:DEF"), "ABC/DEF:");
        assert_eq!(mapping.key_for("A-B{C}.VAL"), "A/B/C//VAL:");
        assert_eq!(mapping.key_for("plain"), "plain:");
    }

    #[test]
    fn test_partition_path() {
        let layout = PartitionLayout::new("/data", PartitionGranularity::Hour);
        assert_eq!(
            layout.partition_path("ABC:DEF", T_2012_01_01_03, PARTITION_EXTENSION),
            PathBuf::from("/data/ABC/DEF:2012_01_01_03.pb")
        );
        assert_eq!(
            layout.container_path("ABC:DEF"),
            PathBuf::from("/data/ABC/DEF:_pb.zip")
        );
    }

    #[test]
    fn test_list_partition_files_sorted_and_filtered() {
        let temp_dir = TempDir::new().unwrap();
        let layout = PartitionLayout::new(temp_dir.path(), PartitionGranularity::Hour);
        let dir = temp_dir.path().join("ABC");
        fs::create_dir_all(&dir).unwrap();

        for hour in [5, 1, 3] {
            let path = layout.partition_path(
                "ABC:DEF",
                T_2012_01_01_03 + (hour - 3) * 3600,
                PARTITION_EXTENSION,
            );
            fs::write(path, b"x").unwrap();
        }
        // Another PV sharing the directory, a staged file and a daily file.
        fs::write(dir.join("DEFG:2012_01_01_03.pb"), b"x").unwrap();
        fs::write(dir.join("DEF:2012_01_01_03.pbappend"), b"x").unwrap();
        fs::write(dir.join("DEF:2012_01_01.pb"), b"x").unwrap();

        let files = layout
            .list_partition_files("ABC:DEF", PARTITION_EXTENSION)
            .unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "DEF:2012_01_01_01.pb",
                "DEF:2012_01_01_03.pb",
                "DEF:2012_01_01_05.pb"
            ]
        );
    }

    #[test]
    fn test_paths_before_current_partition() {
        let temp_dir = TempDir::new().unwrap();
        let layout = PartitionLayout::new(temp_dir.path(), PartitionGranularity::Hour);
        fs::create_dir_all(temp_dir.path().join("ABC")).unwrap();
        for hour in 0..4 {
            let path = layout.partition_path(
                "ABC:DEF",
                T_2012_01_01_03 + hour * 3600,
                PARTITION_EXTENSION,
            );
            fs::write(path, b"x").unwrap();
        }

        // Halfway through the third file's hour: two files lie strictly before.
        let now = T_2012_01_01_03 + 2 * 3600 + 1800;
        let files = layout
            .paths_before_current_partition("ABC:DEF", now, PARTITION_EXTENSION)
            .unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].name, "DEF:2012_01_01_04.pb");
    }

    #[test]
    fn test_missing_folder_lists_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let layout = PartitionLayout::new(temp_dir.path(), PartitionGranularity::Day);
        assert!(layout
            .list_partition_files("NOPE:PV", PARTITION_EXTENSION)
            .unwrap()
            .is_empty());
    }
}
