//! Lazy read path over a chronological sequence of partitions.

use crate::codec::{decode_event_line, read_line, LineRead};
use crate::error::{Result, StoreError};
use crate::event::{Event, EventStream, SampleKind, StreamDescription};
use crate::search::{PositionSearch, TimestampComparator};
use crate::store::container::PartitionContainer;
use crate::store::info::PartitionInfo;
use crate::time::Timestamp;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Cursor, ErrorKind, Read, Seek, SeekFrom};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Where one partition's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionSource {
    /// A loose partition file.
    File(PathBuf),
    /// An entry inside a per-PV container.
    Entry {
        /// Container path.
        container: PathBuf,
        /// Entry name (the loose file name the partition had).
        name: String,
    },
}

impl PartitionSource {
    /// Returns the partition file name, which orders partitions chronologically.
    pub fn partition_name(&self) -> String {
        match self {
            Self::File(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Self::Entry { name, .. } => name.clone(),
        }
    }

    /// Returns a name for log and error messages.
    pub fn display_name(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Entry { container, name } => format!("{}!{}", container.display(), name),
        }
    }

    /// Opens the partition, returning a seekable reader and its size.
    pub fn open(&self) -> Result<(SourceReader, u64)> {
        match self {
            Self::File(path) => {
                let file = File::open(path)?;
                let size = file.metadata()?.len();
                Ok((SourceReader::File(file), size))
            }
            Self::Entry { container, name } => {
                let data = PartitionContainer::new(container)
                    .read_entry(name)?
                    .ok_or_else(|| {
                        io::Error::new(
                            ErrorKind::NotFound,
                            format!("no entry {} in {}", name, container.display()),
                        )
                    })?;
                let size = data.len() as u64;
                Ok((SourceReader::Memory(Cursor::new(data)), size))
            }
        }
    }

    /// Reads the whole partition into memory.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        let (mut reader, size) = self.open()?;
        let mut data = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Reads header, boundary events and committed length.
    pub fn info(&self) -> Result<Option<PartitionInfo>> {
        let (mut reader, size) = self.open()?;
        PartitionInfo::read_from(&mut reader, size, &self.display_name())
    }
}

/// Seekable reader over a loose file or an in-memory container entry.
#[derive(Debug)]
pub enum SourceReader {
    /// Loose file.
    File(File),
    /// Container entry, decompressed.
    Memory(Cursor<Vec<u8>>),
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::File(file) => file.read(buf),
            Self::Memory(cursor) => cursor.read(buf),
        }
    }
}

impl Seek for SourceReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::File(file) => file.seek(pos),
            Self::Memory(cursor) => cursor.seek(pos),
        }
    }
}

struct OpenPartition {
    name: String,
    reader: BufReader<SourceReader>,
    year: i32,
}

/// Event stream over a list of partitions, opened one at a time.
///
/// A bounded stream starts with the last event at or before the range start, so
/// a reader always learns the value in effect at `start`.
///
/// Zero-length, headerless, truncated and malformed partitions contribute the
/// events that precede the damage and are otherwise skipped with one warning.
/// A search that exhausts its probe budget is reported as an error item.
///
/// # Examples
/// ```rust,ignore
/// let sources = vec![PartitionSource::File(path)];
/// let stream = PartitionStream::open("ABC:DEF", "STS", sources, Some((start, end)))?;
/// for event in stream {
///     println!("{}", event?.timestamp);
/// }
/// ```
pub struct PartitionStream {
    description: StreamDescription,
    sources: VecDeque<PartitionSource>,
    range: Option<(Timestamp, Timestamp)>,
    current: Option<OpenPartition>,
    pending_error: Option<StoreError>,
    /// Newest event seen before the range start.
    lead: Option<Event>,
    /// Event held back while `lead` is emitted.
    queued: Option<Event>,
    reached_start: bool,
    done: bool,
}

impl PartitionStream {
    /// Opens a stream over `sources` (oldest first) restricted to `range`
    /// (inclusive on both ends, plus the last event at or before `start`), or over
    /// everything when `range` is `None`.
    ///
    /// The first readable partition is opened immediately to learn the sample kind;
    /// a stream without readable partitions describes itself as a scalar double.
    pub fn open(
        pv: &str,
        store_name: &str,
        sources: Vec<PartitionSource>,
        range: Option<(Timestamp, Timestamp)>,
    ) -> Result<Self> {
        let mut stream = Self {
            description: StreamDescription::new(pv, SampleKind::ScalarDouble, store_name),
            sources: sources.into(),
            range,
            current: None,
            pending_error: None,
            lead: None,
            queued: None,
            reached_start: false,
            done: false,
        };
        match stream.open_next() {
            Ok(Some((partition, kind, element_count))) => {
                stream.description.kind = kind;
                stream.description.element_count = element_count;
                stream.current = Some(partition);
            }
            Ok(None) => stream.done = true,
            Err(err @ StoreError::SearchNonConvergence { .. }) => stream.pending_error = Some(err),
            Err(err) => return Err(err),
        }
        Ok(stream)
    }

    /// Opens the next readable partition, positioned at the first event to read.
    fn open_next(&mut self) -> Result<Option<(OpenPartition, SampleKind, u32)>> {
        while let Some(source) = self.sources.pop_front() {
            let name = source.display_name();
            let (mut reader, size) = match source.open() {
                Ok(opened) => opened,
                Err(StoreError::IoError(err)) if err.kind() == ErrorKind::NotFound => {
                    warn!("Partition {} disappeared before it could be read", name);
                    continue;
                }
                Err(err) => return Err(err),
            };
            if size == 0 {
                warn!("Skipping zero-length partition {}", name);
                continue;
            }

            let (header, header_end) = match PartitionInfo::read_header(&mut reader, &name) {
                Ok(Some(header)) => header,
                Ok(None) => {
                    warn!("Skipping partition {} with an incomplete header", name);
                    continue;
                }
                Err(err) if err.is_corruption() => {
                    warn!("Skipping partition {} with a malformed header: {}", name, err);
                    continue;
                }
                Err(err) => return Err(err),
            };
            if header.pv != self.description.pv {
                warn!(
                    "Skipping partition {} which belongs to {} rather than {}",
                    name, header.pv, self.description.pv
                );
                continue;
            }

            let mut position = header_end;
            if let Some((start, _)) = self.range {
                let comparator = TimestampComparator::new(start, header.year);
                let mut search =
                    PositionSearch::new(reader, size).with_start_position(header_end - 1);
                match search.seek(&comparator) {
                    Ok(Some(found)) => position = found,
                    Ok(None) => {}
                    Err(StoreError::SearchProbe { source, .. }) if source.is_corruption() => {
                        warn!(
                            "Search in {} hit damaged data ({}); scanning from the start",
                            name, source
                        );
                    }
                    Err(err) => return Err(err),
                }
                reader = search.into_inner();
            }
            reader.seek(SeekFrom::Start(position))?;
            debug!("Reading {} from offset {}", name, position);

            let partition = OpenPartition {
                name,
                reader: BufReader::new(reader),
                year: header.year,
            };
            return Ok(Some((partition, header.kind, header.element_count)));
        }
        Ok(None)
    }
}

impl Iterator for PartitionStream {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending_error.take() {
            return Some(Err(err));
        }
        if let Some(event) = self.queued.take() {
            return Some(Ok(event));
        }
        let mut line = Vec::new();
        loop {
            if self.done {
                return self.lead.take().map(Ok);
            }
            let Some(partition) = self.current.as_mut() else {
                match self.open_next() {
                    Ok(Some((partition, _, _))) => self.current = Some(partition),
                    Ok(None) => {
                        self.done = true;
                        continue;
                    }
                    Err(err) => return Some(Err(err)),
                }
                continue;
            };

            match read_line(&mut partition.reader, &mut line) {
                Ok(LineRead::Complete(_)) => {}
                Ok(LineRead::Partial(_)) => {
                    warn!("Ignoring truncated last line of {}", partition.name);
                    self.current = None;
                    continue;
                }
                Ok(LineRead::Eof) => {
                    self.current = None;
                    continue;
                }
                Err(err) => {
                    self.current = None;
                    return Some(Err(err.into()));
                }
            }

            let event = match decode_event_line(&line, partition.year) {
                Ok(event) => event,
                Err(err) => {
                    warn!(
                        "Skipping the rest of {} after a malformed event: {}",
                        partition.name, err
                    );
                    self.current = None;
                    continue;
                }
            };

            if let Some((start, end)) = self.range {
                if !self.reached_start {
                    if event.timestamp < start {
                        self.lead = Some(event);
                        continue;
                    }
                    self.reached_start = true;
                    if event.timestamp == start {
                        self.lead = None;
                    }
                }
                if event.timestamp > end {
                    self.current = None;
                    self.done = true;
                    continue;
                }
                if let Some(lead) = self.lead.take() {
                    self.queued = Some(event);
                    return Some(Ok(lead));
                }
            }
            return Some(Ok(event));
        }
    }
}

impl EventStream for PartitionStream {
    fn description(&self) -> &StreamDescription {
        &self.description
    }
}
