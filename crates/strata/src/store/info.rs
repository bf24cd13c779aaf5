//! Header, boundary events and committed length of one partition.

use crate::codec::{decode_event_line, read_line, FileHeader, LineRead, NEWLINE};
use crate::error::{Result, StoreError};
use crate::event::Event;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

const TAIL_CHUNK: u64 = 4096;

/// What a reader needs to know about a partition before streaming it.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionInfo {
    /// Decoded header line.
    pub header: FileHeader,
    /// Offset of the first byte after the header line.
    pub header_end: u64,
    /// First event, if any.
    pub first_event: Option<Event>,
    /// Last complete event, if any.
    pub last_event: Option<Event>,
    /// Offset of the first byte after the last complete line.
    pub data_end: u64,
    /// Size in bytes, including any truncated tail.
    pub size: u64,
}

impl PartitionInfo {
    /// Reads partition information from `size` bytes of `reader`.
    ///
    /// Returns `None` when there is no complete header line (zero-length or
    /// interrupted files). `name` is used in error messages.
    pub fn read_from<R: Read + Seek>(
        reader: &mut R,
        size: u64,
        name: &str,
    ) -> Result<Option<Self>> {
        if size == 0 {
            return Ok(None);
        }
        let Some((header, header_end)) = Self::read_header(reader, name)? else {
            return Ok(None);
        };

        reader.seek(SeekFrom::Start(header_end))?;
        let mut line = Vec::new();
        let first_line = match read_line(&mut BufReader::new(&mut *reader), &mut line)? {
            LineRead::Complete(_) => Some(line),
            LineRead::Partial(_) | LineRead::Eof => None,
        };

        let data_end = match last_newline_before(reader, size)? {
            Some(offset) => offset + 1,
            None => return Ok(None),
        };

        let first_event = first_line
            .map(|line| decode_event_line(&line, header.year).map_err(|err| in_file(err, name)))
            .transpose()?;

        let last_event = if data_end > header_end {
            let line_start = match last_newline_before(reader, data_end - 1)? {
                Some(offset) => offset + 1,
                None => 0,
            };
            let mut last_line = vec![0u8; (data_end - 1 - line_start) as usize];
            reader.seek(SeekFrom::Start(line_start))?;
            reader.read_exact(&mut last_line)?;
            Some(decode_event_line(&last_line, header.year).map_err(|err| in_file(err, name))?)
        } else {
            None
        };

        Ok(Some(Self {
            header,
            header_end,
            first_event,
            last_event,
            data_end,
            size,
        }))
    }

    /// Reads and decodes the header line, returning it with the offset just past it.
    ///
    /// Returns `None` when the input does not start with a complete line.
    pub fn read_header<R: Read + Seek>(
        reader: &mut R,
        name: &str,
    ) -> Result<Option<(FileHeader, u64)>> {
        reader.seek(SeekFrom::Start(0))?;
        let mut line = Vec::new();
        let header_end = match read_line(&mut BufReader::new(&mut *reader), &mut line)? {
            LineRead::Complete(read) => read as u64,
            LineRead::Partial(_) | LineRead::Eof => return Ok(None),
        };
        let header = FileHeader::decode_line(&line).map_err(|err| in_file(err, name))?;
        Ok(Some((header, header_end)))
    }

    /// Reads partition information from a file on disk.
    pub fn from_path(path: &Path) -> Result<Option<Self>> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();
        Self::read_from(&mut file, size, &path.display().to_string())
    }

    /// Returns true when the file ends in a partial line.
    pub fn has_truncated_tail(&self) -> bool {
        self.data_end != self.size
    }
}

/// Finds the offset of the last newline strictly before `end`.
fn last_newline_before<R: Read + Seek>(reader: &mut R, end: u64) -> Result<Option<u64>> {
    let mut chunk_end = end;
    let mut buf = vec![0u8; TAIL_CHUNK as usize];
    while chunk_end > 0 {
        let chunk_start = chunk_end.saturating_sub(TAIL_CHUNK);
        let len = (chunk_end - chunk_start) as usize;
        reader.seek(SeekFrom::Start(chunk_start))?;
        reader.read_exact(&mut buf[..len])?;
        if let Some(index) = buf[..len].iter().rposition(|b| *b == NEWLINE) {
            return Ok(Some(chunk_start + index as u64));
        }
        chunk_end = chunk_start;
    }
    Ok(None)
}

fn in_file(err: StoreError, name: &str) -> StoreError {
    match err {
        StoreError::MalformedPartition { reason, .. } => StoreError::malformed(name, reason),
        other => other,
    }
}
