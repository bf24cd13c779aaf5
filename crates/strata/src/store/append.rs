//! Partition-boundary aware, monotonic append.

use crate::codec::{encode_event_line, FileHeader};
use crate::error::{Result, StoreError};
use crate::event::{EventStream, SampleKind};
use crate::partition::{PartitionLayout, PARTITION_EXTENSION, STAGED_EXTENSION};
use crate::store::container::PartitionContainer;
use crate::store::info::PartitionInfo;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Counts reported by one append call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendSummary {
    /// Events written.
    pub written: u64,
    /// Events skipped because they were not after the last stored event.
    pub skipped: u64,
    /// Bytes written, headers included.
    pub bytes: u64,
}

impl AppendSummary {
    /// Adds another summary to this one.
    pub fn merge(&mut self, other: AppendSummary) {
        self.written += other.written;
        self.skipped += other.skipped;
        self.bytes += other.bytes;
    }
}

struct OpenPartitionFile {
    path: PathBuf,
    writer: BufWriter<File>,
    year: i32,
    next_partition_first_second: i64,
}

/// Writes one PV's events into the partitions their timestamps fall in.
///
/// Events at or before the last stored event are skipped. Partition files that
/// already exist are validated and extended; when a staged companion does not exist
/// yet it is seeded from the committed copy (a loose file or a container entry).
pub(crate) struct PartitionAppender<'a> {
    layout: &'a PartitionLayout,
    pv: &'a str,
    extension: &'static str,
    container: Option<PartitionContainer>,
    last_known: Option<Timestamp>,
    current: Option<OpenPartitionFile>,
    summary: AppendSummary,
}

impl<'a> PartitionAppender<'a> {
    pub(crate) fn new(
        layout: &'a PartitionLayout,
        pv: &'a str,
        extension: &'static str,
        last_known: Option<Timestamp>,
    ) -> Self {
        Self {
            layout,
            pv,
            extension,
            container: None,
            last_known,
            current: None,
            summary: AppendSummary::default(),
        }
    }

    /// Seeds missing partitions from entries of this container.
    pub(crate) fn with_container(mut self, container: PartitionContainer) -> Self {
        self.container = Some(container);
        self
    }

    pub(crate) fn append(mut self, stream: &mut dyn EventStream) -> Result<AppendSummary> {
        let kind = stream.description().kind;
        let element_count = stream.description().element_count;

        for event in stream {
            let event = event?;
            if self.is_stale(event.timestamp) {
                continue;
            }

            let epoch_seconds = event.timestamp.epoch_seconds();
            let switch = match &self.current {
                Some(current) => epoch_seconds >= current.next_partition_first_second,
                None => true,
            };
            if switch {
                self.finish_current()?;
                let opened = self.open_partition(event.timestamp, kind, element_count)?;
                self.current = Some(opened);
                if self.is_stale(event.timestamp) {
                    continue;
                }
            }

            if let Some(current) = self.current.as_mut() {
                let line = encode_event_line(&event, current.year)?;
                current.writer.write_all(&line)?;
                self.summary.written += 1;
                self.summary.bytes += line.len() as u64;
                self.last_known = Some(event.timestamp);
            }
        }

        self.finish_current()?;
        Ok(self.summary)
    }

    fn is_stale(&mut self, timestamp: Timestamp) -> bool {
        match self.last_known {
            Some(last) if timestamp <= last => {
                debug!(
                    "Skipping event at {} for pv {}; last stored event is at {}",
                    timestamp, self.pv, last
                );
                self.summary.skipped += 1;
                true
            }
            _ => false,
        }
    }

    fn open_partition(
        &mut self,
        timestamp: Timestamp,
        kind: SampleKind,
        element_count: u32,
    ) -> Result<OpenPartitionFile> {
        let epoch_seconds = timestamp.epoch_seconds();
        let path = self
            .layout
            .partition_path(self.pv, epoch_seconds, self.extension);
        let next_partition_first_second = self
            .layout
            .granularity()
            .next_partition_first_second(epoch_seconds);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            self.seed(&path, epoch_seconds)?;
        }

        let existing = if path.exists() {
            PartitionInfo::from_path(&path)?
        } else {
            None
        };

        let (file, year) = match existing {
            Some(info) => {
                if info.header.pv != self.pv {
                    return Err(StoreError::PvMismatch {
                        path: path.display().to_string(),
                        expected: self.pv.to_string(),
                        found: info.header.pv,
                    });
                }
                let mut file = OpenOptions::new().write(true).open(&path)?;
                if info.has_truncated_tail() {
                    warn!(
                        "Cutting {} bytes of truncated data from the end of {}",
                        info.size - info.data_end,
                        path.display()
                    );
                    file.set_len(info.data_end)?;
                }
                file.seek(SeekFrom::End(0))?;
                if let Some(last) = info.last_event {
                    if self.last_known.map_or(true, |known| last.timestamp > known) {
                        self.last_known = Some(last.timestamp);
                    }
                }
                (file, info.header.year)
            }
            None => {
                if path.exists() {
                    warn!(
                        "Restarting partition {} which has no complete header",
                        path.display()
                    );
                }
                let mut file = File::create(&path)?;
                let year = timestamp.year();
                let mut header = FileHeader::new(self.pv, kind, year);
                header.element_count = element_count;
                let line = header.encode_line()?;
                file.write_all(&line)?;
                self.summary.bytes += line.len() as u64;
                (file, year)
            }
        };

        debug!("Appending to {} for pv {}", path.display(), self.pv);
        Ok(OpenPartitionFile {
            path,
            writer: BufWriter::new(file),
            year,
            next_partition_first_second,
        })
    }

    /// Copies the committed content of a partition into a file that does not exist yet.
    fn seed(&self, path: &Path, epoch_seconds: i64) -> Result<()> {
        let live = self
            .layout
            .partition_path(self.pv, epoch_seconds, PARTITION_EXTENSION);
        if self.extension == STAGED_EXTENSION && live.exists() {
            fs::copy(&live, path)?;
            debug!("Seeded {} from {}", path.display(), live.display());
            return Ok(());
        }
        let Some(container) = &self.container else {
            return Ok(());
        };
        let Some(entry_name) = live.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        if let Some(data) = container.read_entry(entry_name)? {
            fs::write(path, data)?;
            debug!(
                "Seeded {} from {} in {}",
                path.display(),
                entry_name,
                container.path().display()
            );
        }
        Ok(())
    }

    fn finish_current(&mut self) -> Result<()> {
        if let Some(current) = self.current.take() {
            let file = current
                .writer
                .into_inner()
                .map_err(|err| StoreError::IoError(err.into_error()))?;
            file.sync_all()?;
            debug!("Closed {}", current.path.display());
        }
        Ok(())
    }
}

/// Writes a complete partition file (header plus every event of `stream`).
pub(crate) fn write_partition_file(
    path: &Path,
    header: &FileHeader,
    stream: &mut dyn EventStream,
) -> Result<u64> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&header.encode_line()?)?;
    let mut written = 0;
    for event in stream {
        writer.write_all(&encode_event_line(&event?, header.year)?)?;
        written += 1;
    }
    let file = writer
        .into_inner()
        .map_err(|err| StoreError::IoError(err.into_error()))?;
    file.sync_all()?;
    Ok(written)
}
