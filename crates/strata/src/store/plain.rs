//! Plain partitioned store: one file per PV per partition under a root folder.

use crate::codec::FileHeader;
use crate::error::{Result, StoreError};
use crate::event::{BoxedEventStream, Event, EventStream};
use crate::partition::{PartitionLayout, PvNameToKey, PARTITION_EXTENSION, STAGED_EXTENSION};
use crate::postprocess::ConversionFunction;
use crate::store::append::{write_partition_file, AppendSummary, PartitionAppender};
use crate::store::container::PartitionContainer;
use crate::store::stream::{PartitionSource, PartitionStream};
use crate::store::{
    CompressionMode, EtlDest, EtlSource, Fingerprint, PartitionInfo, StoragePlugin, StoreConfig,
    StoredPartition,
};
use crate::time::Timestamp;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Partitioned store on a local filesystem (`pb://`).
///
/// Reads merge loose partition files with the entries of the PV's zip container;
/// when both hold a partition the loose file is used.
///
/// # Examples
/// ```rust,ignore
/// use alopex_strata::partition::PartitionGranularity;
/// use alopex_strata::store::{PlainStore, StoragePlugin, StoreConfig};
///
/// let store = PlainStore::new(StoreConfig::plain("STS", "/data/sts", PartitionGranularity::Hour))?;
/// store.append("ABC:DEF", &mut events)?;
/// let stream = store.get_data("ABC:DEF", start, end)?;
/// ```
#[derive(Debug)]
pub struct PlainStore {
    config: StoreConfig,
    layout: PartitionLayout,
}

impl PlainStore {
    /// Creates a store with the default PV-name-to-key mapping.
    pub fn new(config: StoreConfig) -> Result<Self> {
        let root = Self::root_of(&config)?;
        let layout = PartitionLayout::new(root, config.granularity);
        Ok(Self { config, layout })
    }

    /// Creates a store with a custom PV-name-to-key mapping.
    pub fn with_key_mapping(
        config: StoreConfig,
        key_mapping: Arc<dyn PvNameToKey>,
    ) -> Result<Self> {
        let root = Self::root_of(&config)?;
        let layout = PartitionLayout::with_key_mapping(root, config.granularity, key_mapping);
        Ok(Self { config, layout })
    }

    fn root_of(config: &StoreConfig) -> Result<PathBuf> {
        config.root_folder.clone().ok_or_else(|| {
            StoreError::ConfigError(format!("store {} has no rootFolder", config.name))
        })
    }

    /// Returns the path layout of this store.
    pub fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    /// Returns the container that holds `pv`'s consolidated partitions.
    pub fn container(&self, pv: &str) -> PartitionContainer {
        PartitionContainer::new(self.layout.container_path(pv))
    }

    /// Lists loose files and container entries of `pv`, sorted by name.
    pub fn partition_entries(&self, pv: &str) -> Result<Vec<StoredPartition>> {
        let mut partitions = Vec::new();
        let mut loose_names = BTreeSet::new();

        for file in self.layout.list_partition_files(pv, PARTITION_EXTENSION)? {
            let metadata = match fs::metadata(&file.path) {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            loose_names.insert(file.name.clone());
            partitions.push(StoredPartition {
                source: PartitionSource::File(file.path),
                name: file.name,
                range: file.range,
                size: metadata.len(),
                modified: metadata.modified()?,
            });
        }

        let container = self.container(pv);
        let entries = container.entries()?;
        if !entries.is_empty() {
            let modified = fs::metadata(container.path())?.modified()?;
            let (_, prefix) = self.layout.pv_dir_and_prefix(pv);
            for (name, size) in entries {
                if loose_names.contains(&name) {
                    debug!(
                        "Partition {} of {} exists loose and in {}; using the loose file",
                        name,
                        pv,
                        container.path().display()
                    );
                    continue;
                }
                match self.layout.parse_file_name(&prefix, &name, PARTITION_EXTENSION) {
                    Some(Ok(range)) => partitions.push(StoredPartition {
                        source: PartitionSource::Entry {
                            container: container.path().to_path_buf(),
                            name: name.clone(),
                        },
                        name,
                        range,
                        size,
                        modified,
                    }),
                    Some(Err(err)) => warn!(
                        "Skipping entry {} in {}: {}",
                        name,
                        container.path().display(),
                        err
                    ),
                    None => {}
                }
            }
        }

        partitions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(partitions)
    }

    fn known_event<'a, I>(&self, pv: &str, partitions: I, newest: bool) -> Result<Option<Event>>
    where
        I: Iterator<Item = &'a StoredPartition>,
    {
        self.find_in_partitions(pv, partitions, |_, info| {
            if newest {
                info.last_event
            } else {
                info.first_event
            }
        })
    }

    /// Returns the first `pick` result over the summaries of `partitions`.
    ///
    /// Empty, vanished and corrupt partitions are skipped.
    fn find_in_partitions<'a, I, T, F>(
        &self,
        pv: &str,
        partitions: I,
        mut pick: F,
    ) -> Result<Option<T>>
    where
        I: Iterator<Item = &'a StoredPartition>,
        F: FnMut(&'a StoredPartition, PartitionInfo) -> Option<T>,
    {
        for partition in partitions {
            let name = partition.source.display_name();
            let info = match partition.source.info() {
                Ok(Some(info)) => info,
                Ok(None) => {
                    warn!("Skipping empty partition {} of {}", name, pv);
                    continue;
                }
                Err(StoreError::IoError(err)) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) if err.is_corruption() => {
                    warn!("Skipping unreadable partition {} of {}: {}", name, pv, err);
                    continue;
                }
                Err(err) => return Err(err),
            };
            if let Some(found) = pick(partition, info) {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn append_with_extension(
        &self,
        pv: &str,
        stream: &mut dyn EventStream,
        extension: &'static str,
    ) -> Result<AppendSummary> {
        let last_known = self.last_known_event(pv)?.map(|event| event.timestamp);
        let summary = PartitionAppender::new(&self.layout, pv, extension, last_known)
            .with_container(self.container(pv))
            .append(stream)?;
        debug!(
            "Appended {} events ({} skipped) for {} into {}",
            summary.written, summary.skipped, pv, self.config.name
        );
        Ok(summary)
    }

    fn remove_files(&self, pv: &str, extension: &str) -> Result<usize> {
        let files = self.layout.list_partition_files(pv, extension)?;
        let count = files.len();
        for file in files {
            remove_if_present(&file.path)?;
        }
        Ok(count)
    }

    fn tmp_sibling(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(format!("_tmp_{:08x}", rand::random::<u32>()));
        path.with_file_name(name)
    }

    /// Converts one partition into a temporary sibling of `target`.
    ///
    /// Returns `None` when the partition is empty or already has the wanted form.
    fn convert_partition(
        &self,
        pv: &str,
        partition: &StoredPartition,
        conversion: &dyn ConversionFunction,
        target: &Path,
    ) -> Result<Option<PathBuf>> {
        let Some(info) = partition.source.info()? else {
            warn!(
                "Skipping conversion of empty partition {}",
                partition.source.display_name()
            );
            return Ok(None);
        };
        let stream = PartitionStream::open(
            pv,
            &self.config.name,
            vec![partition.source.clone()],
            None,
        )?;
        if !conversion.should_convert(stream.description()) {
            debug!("Partition {} of {} needs no conversion", partition.name, pv);
            return Ok(None);
        }
        let mut converted = conversion.convert(Box::new(stream));
        let description = converted.description().clone();
        let mut header = FileHeader::new(pv, description.kind, info.header.year);
        header.element_count = description.element_count;
        header.fields = info.header.fields;

        let tmp = Self::tmp_sibling(target);
        if let Err(err) = write_partition_file(&tmp, &header, &mut converted) {
            remove_if_present(&tmp)?;
            return Err(err);
        }
        Ok(Some(tmp))
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

impl StoragePlugin for PlainStore {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn append(&self, pv: &str, stream: &mut dyn EventStream) -> Result<AppendSummary> {
        self.append_with_extension(pv, stream, PARTITION_EXTENSION)
    }

    fn get_data(&self, pv: &str, start: Timestamp, end: Timestamp) -> Result<BoxedEventStream> {
        let (earlier, partitions): (Vec<_>, Vec<_>) = self
            .partition_entries(pv)?
            .into_iter()
            .partition(|partition| partition.range.end < start.epoch_seconds());
        let mut sources: Vec<PartitionSource> = partitions
            .into_iter()
            .filter(|partition| {
                partition
                    .range
                    .intersects(start.epoch_seconds(), end.epoch_seconds())
            })
            .map(|partition| partition.source)
            .collect();

        // The value in effect at `start` may live in an older partition.
        let lead = self.find_in_partitions(pv, earlier.iter().rev(), |partition, info| {
            (info.header.pv == pv && info.last_event.is_some()).then(|| partition.source.clone())
        })?;
        if let Some(source) = lead {
            debug!("Reading the sample before {} from {}", start, source.display_name());
            sources.insert(0, source);
        }

        debug!(
            "Reading {} partitions of {} from {} between {} and {}",
            sources.len(),
            pv,
            self.config.name,
            start,
            end
        );
        let stream = PartitionStream::open(pv, &self.config.name, sources, Some((start, end)))?;
        Ok(Box::new(stream))
    }

    fn last_known_event(&self, pv: &str) -> Result<Option<Event>> {
        let partitions = self.partition_entries(pv)?;
        self.known_event(pv, partitions.iter().rev(), true)
    }

    fn first_known_event(&self, pv: &str) -> Result<Option<Event>> {
        let partitions = self.partition_entries(pv)?;
        self.known_event(pv, partitions.iter(), false)
    }

    fn rename(&self, pv: &str, new_pv: &str) -> Result<()> {
        let partitions = self.partition_entries(pv)?;
        if partitions.is_empty() {
            debug!("Nothing to rename for {} in {}", pv, self.config.name);
            return Ok(());
        }
        let sources = partitions.into_iter().map(|p| p.source).collect();
        let mut stream = PartitionStream::open(pv, &self.config.name, sources, None)?;
        let summary = self.append(new_pv, &mut stream)?;
        drop(stream);
        self.delete(pv)?;
        info!(
            "Renamed {} to {} in {} ({} events)",
            pv, new_pv, self.config.name, summary.written
        );
        Ok(())
    }

    fn delete(&self, pv: &str) -> Result<()> {
        let removed = self.remove_files(pv, PARTITION_EXTENSION)?
            + self.remove_files(pv, STAGED_EXTENSION)?;
        self.container(pv).remove()?;
        info!(
            "Deleted {} partition files of {} from {}",
            removed, pv, self.config.name
        );
        Ok(())
    }

    fn convert(&self, pv: &str, conversion: &dyn ConversionFunction) -> Result<()> {
        let container = self.container(pv);
        let mut container_upserts = Vec::new();
        let mut converted = 0usize;

        for partition in self.partition_entries(pv)? {
            match &partition.source {
                PartitionSource::File(path) => {
                    if let Some(tmp) = self.convert_partition(pv, &partition, conversion, path)? {
                        fs::rename(&tmp, path)?;
                        converted += 1;
                    }
                }
                PartitionSource::Entry { name, .. } => {
                    let target = container.path().with_file_name(name);
                    let converted_entry =
                        self.convert_partition(pv, &partition, conversion, &target)?;
                    if let Some(tmp) = converted_entry {
                        container_upserts.push((name.clone(), tmp));
                    }
                }
            }
        }

        if !container_upserts.is_empty() {
            let result = container.update(&container_upserts, &[]);
            for (_, tmp) in &container_upserts {
                remove_if_present(tmp)?;
            }
            result?;
            converted += container_upserts.len();
        }
        info!(
            "Converted {} partitions of {} in {}",
            converted, pv, self.config.name
        );
        Ok(())
    }

    fn etl_source(&self) -> Option<&dyn EtlSource> {
        Some(self)
    }

    fn etl_dest(&self) -> &dyn EtlDest {
        self
    }
}

impl EtlSource for PlainStore {
    fn partitions(&self, pv: &str) -> Result<Vec<StoredPartition>> {
        self.partition_entries(pv)
    }

    fn open_partitions(
        &self,
        pv: &str,
        partitions: &[StoredPartition],
    ) -> Result<BoxedEventStream> {
        let sources = partitions.iter().map(|p| p.source.clone()).collect();
        Ok(Box::new(PartitionStream::open(
            pv,
            &self.config.name,
            sources,
            None,
        )?))
    }

    fn fingerprint(&self, partition: &StoredPartition) -> Result<Fingerprint> {
        Ok(Fingerprint::of(&partition.source.read_all()?))
    }

    fn backup_partition(
        &self,
        pv: &str,
        partition: &StoredPartition,
        folder: &Path,
    ) -> Result<PathBuf> {
        let (dir, _) = self.layout.pv_dir_and_prefix(pv);
        let relative = dir.strip_prefix(self.layout.root()).unwrap_or(Path::new(""));
        let target_dir = folder.join(relative);
        fs::create_dir_all(&target_dir)?;
        let target = target_dir.join(&partition.name);
        match &partition.source {
            PartitionSource::File(path) => {
                fs::copy(path, &target)?;
            }
            source @ PartitionSource::Entry { .. } => {
                fs::write(&target, source.read_all()?)?;
            }
        }
        debug!(
            "Backed up {} to {}",
            partition.source.display_name(),
            target.display()
        );
        Ok(target)
    }

    fn delete_partition(&self, pv: &str, partition: &StoredPartition) -> Result<bool> {
        match &partition.source {
            PartitionSource::File(path) => {
                let size = match fs::metadata(path) {
                    Ok(metadata) => metadata.len(),
                    Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
                    Err(err) => return Err(err.into()),
                };
                if size != partition.size {
                    warn!(
                        "Not deleting {} of {}: size changed from {} to {} since it was listed",
                        path.display(),
                        pv,
                        partition.size,
                        size
                    );
                    return Ok(false);
                }
                remove_if_present(path)?;
            }
            PartitionSource::Entry { container, name } => {
                let container = PartitionContainer::new(container);
                let size = container
                    .entries()?
                    .into_iter()
                    .find(|(entry, _)| entry == name)
                    .map(|(_, size)| size);
                match size {
                    None => return Ok(true),
                    Some(size) if size != partition.size => {
                        warn!(
                            "Not deleting {} of {}: size changed from {} to {} since it was listed",
                            partition.source.display_name(),
                            pv,
                            partition.size,
                            size
                        );
                        return Ok(false);
                    }
                    Some(_) => container.update(&[], &[name.clone()])?,
                }
            }
        }
        debug!("Deleted {} of {}", partition.source.display_name(), pv);
        Ok(true)
    }
}

impl EtlDest for PlainStore {
    fn stage_append(&self, pv: &str, stream: &mut dyn EventStream) -> Result<AppendSummary> {
        self.append_with_extension(pv, stream, STAGED_EXTENSION)
    }

    fn commit_staged(&self, pv: &str, now: Timestamp) -> Result<()> {
        for staged in self.layout.list_partition_files(pv, STAGED_EXTENSION)? {
            let live = self
                .layout
                .partition_path(pv, staged.range.start, PARTITION_EXTENSION);
            fs::rename(&staged.path, &live)?;
            debug!("Committed {} as {}", staged.path.display(), live.display());
        }

        if self.config.compression == CompressionMode::ZipPerPv {
            let aged = self.layout.paths_before_current_partition(
                pv,
                now.epoch_seconds(),
                PARTITION_EXTENSION,
            )?;
            if !aged.is_empty() {
                let upserts: Vec<(String, PathBuf)> = aged
                    .iter()
                    .map(|file| (file.name.clone(), file.path.clone()))
                    .collect();
                let container = self.container(pv);
                container.update(&upserts, &[])?;
                for file in &aged {
                    remove_if_present(&file.path)?;
                }
                info!(
                    "Moved {} partitions of {} into {}",
                    aged.len(),
                    pv,
                    container.path().display()
                );
            }
        }
        Ok(())
    }

    fn discard_staged(&self, pv: &str) -> Result<()> {
        let removed = self.remove_files(pv, STAGED_EXTENSION)?;
        if removed > 0 {
            warn!(
                "Discarded {} staged partitions of {} in {}",
                removed, pv, self.config.name
            );
        }
        Ok(())
    }

    fn ledger_dir(&self) -> Option<PathBuf> {
        Some(self.layout.root().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{collect_events, SampleKind, SampleValue, StreamDescription, VecEventStream};
    use crate::partition::PartitionGranularity;
    use crate::postprocess::TypeConversion;
    use tempfile::TempDir;

    const PV: &str = "ABC:DEF";
    // 2012-01-01T00:00:00Z
    const T0: i64 = 1_325_376_000;

    fn store(temp_dir: &TempDir, compression: CompressionMode) -> PlainStore {
        PlainStore::new(
            StoreConfig::plain("STS", temp_dir.path(), PartitionGranularity::Hour)
                .with_compression(compression),
        )
        .unwrap()
    }

    fn samples(pv: &str, start: i64, count: i64, step: i64) -> VecEventStream {
        let events = (0..count)
            .map(|i| {
                Event::new(
                    Timestamp::from_epoch_seconds(start + i * step),
                    SampleValue::Double(i as f64),
                )
            })
            .collect();
        VecEventStream::new(
            StreamDescription::new(pv, SampleKind::ScalarDouble, "test"),
            events,
        )
    }

    fn read_all(store: &PlainStore, pv: &str) -> Vec<Event> {
        let mut stream = store
            .get_data(
                pv,
                Timestamp::from_epoch_seconds(T0 - 86_400),
                Timestamp::from_epoch_seconds(T0 + 10 * 86_400),
            )
            .unwrap();
        collect_events(&mut stream).unwrap()
    }

    #[test]
    fn test_append_and_read_range() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, CompressionMode::None);
        let summary = store.append(PV, &mut samples(PV, T0, 24, 450)).unwrap();
        assert_eq!(summary.written, 24);
        assert_eq!(store.partition_entries(PV).unwrap().len(), 3);

        let mut stream = store
            .get_data(
                PV,
                Timestamp::from_epoch_seconds(T0 + 600),
                Timestamp::from_epoch_seconds(T0 + 3600),
            )
            .unwrap();
        let events = collect_events(&mut stream).unwrap();
        let seconds: Vec<i64> = events
            .iter()
            .map(|e| e.timestamp.epoch_seconds() - T0)
            .collect();
        assert_eq!(seconds, vec![450, 900, 1350, 1800, 2250, 2700, 3150, 3600]);
    }

    #[test]
    fn test_range_read_reaches_back_past_empty_hours() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, CompressionMode::None);
        store.append(PV, &mut samples(PV, T0 + 10, 2, 60)).unwrap();
        store.append(PV, &mut samples(PV, T0 + 5 * 3600, 1, 60)).unwrap();
        let newer = store
            .layout()
            .partition_path(PV, T0 + 3600, PARTITION_EXTENSION);
        fs::write(&newer, b"").unwrap();

        let read = |start: i64, end: i64| -> Vec<i64> {
            let mut stream = store
                .get_data(
                    PV,
                    Timestamp::from_epoch_seconds(T0 + start),
                    Timestamp::from_epoch_seconds(T0 + end),
                )
                .unwrap();
            collect_events(&mut stream)
                .unwrap()
                .iter()
                .map(|e| e.timestamp.epoch_seconds() - T0)
                .collect()
        };
        assert_eq!(read(3 * 3600, 3 * 3600 + 60), vec![70]);
        assert_eq!(read(3 * 3600, 6 * 3600), vec![70, 5 * 3600]);
        assert_eq!(read(0, 5), Vec::<i64>::new());
    }

    #[test]
    fn test_append_is_monotonic_across_partitions() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, CompressionMode::None);
        store.append(PV, &mut samples(PV, T0 + 7200, 2, 60)).unwrap();
        let summary = store.append(PV, &mut samples(PV, T0, 3, 60)).unwrap();
        assert_eq!(summary.written, 0);
        assert_eq!(summary.skipped, 3);
        assert_eq!(read_all(&store, PV).len(), 2);
    }

    #[test]
    fn test_known_events_skip_empty_partitions() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, CompressionMode::None);
        store.append(PV, &mut samples(PV, T0, 4, 1800)).unwrap();
        let empty = store
            .layout()
            .partition_path(PV, T0 + 5 * 3600, PARTITION_EXTENSION);
        fs::write(&empty, b"").unwrap();

        let last = store.last_known_event(PV).unwrap().unwrap();
        assert_eq!(last.timestamp, Timestamp::from_epoch_seconds(T0 + 3 * 1800));
        let first = store.first_known_event(PV).unwrap().unwrap();
        assert_eq!(first.timestamp, Timestamp::from_epoch_seconds(T0));
        assert_eq!(read_all(&store, PV).len(), 4);
    }

    #[test]
    fn test_rename_and_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, CompressionMode::None);
        store.append(PV, &mut samples(PV, T0, 10, 900)).unwrap();
        store.rename(PV, "ABC:GHI").unwrap();
        assert!(store.partition_entries(PV).unwrap().is_empty());
        let renamed = read_all(&store, "ABC:GHI");
        assert_eq!(renamed.len(), 10);

        store.delete("ABC:GHI").unwrap();
        assert!(read_all(&store, "ABC:GHI").is_empty());
    }

    #[test]
    fn test_convert_keeps_file_names() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, CompressionMode::None);
        store.append(PV, &mut samples(PV, T0, 8, 900)).unwrap();
        let (dir, _) = store.layout().pv_dir_and_prefix(PV);
        let names = |dir: &Path| -> BTreeSet<String> {
            fs::read_dir(dir)
                .unwrap()
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        };
        let before = names(&dir);

        store
            .convert(PV, &TypeConversion::new(SampleKind::ScalarInt))
            .unwrap();
        assert_eq!(names(&dir), before);
        let events = read_all(&store, PV);
        assert_eq!(events.len(), 8);
        assert_eq!(events[3].value, SampleValue::Int(3));
    }

    #[test]
    fn test_commit_moves_aged_partitions_into_container() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, CompressionMode::ZipPerPv);
        let staged = store
            .stage_append(PV, &mut samples(PV, T0, 12, 900))
            .unwrap();
        assert_eq!(staged.written, 12);
        assert!(read_all(&store, PV).is_empty());

        store
            .commit_staged(PV, Timestamp::from_epoch_seconds(T0 + 2 * 3600 + 10))
            .unwrap();
        let in_container = |store: &PlainStore| {
            store
                .partition_entries(PV)
                .unwrap()
                .iter()
                .filter(|p| matches!(p.source, PartitionSource::Entry { .. }))
                .count()
        };
        assert_eq!(store.partition_entries(PV).unwrap().len(), 3);
        assert_eq!(in_container(&store), 2);
        assert_eq!(read_all(&store, PV).len(), 12);

        store
            .commit_staged(PV, Timestamp::from_epoch_seconds(T0 + 5 * 3600))
            .unwrap();
        assert_eq!(in_container(&store), 3);

        // The loose copy seeded from the container shadows the entry.
        store.append(PV, &mut samples(PV, T0 + 9901, 1, 1)).unwrap();
        assert_eq!(in_container(&store), 2);
        assert_eq!(read_all(&store, PV).len(), 13);
    }

    #[test]
    fn test_delete_partition_rechecks_size() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, CompressionMode::None);
        store.append(PV, &mut samples(PV, T0, 2, 60)).unwrap();
        let partition = store.partition_entries(PV).unwrap().remove(0);
        store.append(PV, &mut samples(PV, T0 + 600, 1, 1)).unwrap();

        assert!(!store.delete_partition(PV, &partition).unwrap());
        let grown = store.partition_entries(PV).unwrap().remove(0);
        assert!(store.delete_partition(PV, &grown).unwrap());
        assert!(store.partition_entries(PV).unwrap().is_empty());
    }

    #[test]
    fn test_backup_keeps_key_layout() {
        let temp_dir = TempDir::new().unwrap();
        let backup_dir = TempDir::new().unwrap();
        let store = store(&temp_dir, CompressionMode::None);
        store.append(PV, &mut samples(PV, T0, 2, 60)).unwrap();
        let partition = store.partition_entries(PV).unwrap().remove(0);
        let target = store
            .backup_partition(PV, &partition, backup_dir.path())
            .unwrap();
        assert_eq!(target, backup_dir.path().join("ABC").join(&partition.name));
        assert_eq!(
            fs::read(&target).unwrap(),
            partition.source.read_all().unwrap()
        );
    }
}
