//! Partition file format.
//!
//! A partition file is a sequence of newline-terminated lines. The first line is the
//! file header; every following line is one event. Line payloads are binary and are
//! escaped so that they never contain a newline or carriage return:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Header line                                                 │
//! │  - Magic: "STRP" (4 bytes), version u8, kind u8              │
//! │  - Year: i32, element count: u32                             │
//! │  - PV name (u16 length + UTF-8), header fields               │
//! │  - CRC32 of the above: u32                                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Event lines (ascending timestamps)                          │
//! │  - Seconds into year: u32, nanos: u32                        │
//! │  - Severity: i32, status: i32, flags: u8, kind: u8           │
//! │  - Value, field values                                       │
//! │  - CRC32 of the above: u32                                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Escaping replaces `0x1B` with `0x1B 0x01`,
//! `\n` with `0x1B 0x02` and `\r` with `0x1B 0x03`.

use crate::error::{Result, StoreError};
use crate::event::{Event, SampleKind, SampleValue};
use crate::time::Timestamp;
use std::collections::BTreeMap;
use std::io::{self, BufRead, Read, Write};

/// Magic bytes of the header line: "STRP".
pub const FILE_MAGIC: [u8; 4] = *b"STRP";

/// Current file format version.
pub const FILE_VERSION: u8 = 1;

/// Line terminator.
pub const NEWLINE: u8 = b'\n';

const ESCAPE: u8 = 0x1B;
const CARRIAGE_RETURN: u8 = b'\r';
const FLAG_ACTUAL_CHANGE: u8 = 0b0000_0001;

/// Escapes a payload so it contains no line terminators.
pub fn escape_into(payload: &[u8], out: &mut Vec<u8>) {
    out.reserve(payload.len() + payload.len() / 16);
    for &byte in payload {
        match byte {
            ESCAPE => out.extend_from_slice(&[ESCAPE, 0x01]),
            NEWLINE => out.extend_from_slice(&[ESCAPE, 0x02]),
            CARRIAGE_RETURN => out.extend_from_slice(&[ESCAPE, 0x03]),
            other => out.push(other),
        }
    }
}

/// Reverses [`escape_into`].
pub fn unescape(line: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(line.len());
    let mut bytes = line.iter();
    while let Some(&byte) = bytes.next() {
        if byte != ESCAPE {
            out.push(byte);
            continue;
        }
        match bytes.next() {
            Some(0x01) => out.push(ESCAPE),
            Some(0x02) => out.push(NEWLINE),
            Some(0x03) => out.push(CARRIAGE_RETURN),
            Some(other) => {
                return Err(StoreError::malformed(
                    "line",
                    format!("invalid escape sequence 0x1B 0x{:02x}", other),
                ))
            }
            None => return Err(StoreError::malformed("line", "dangling escape byte")),
        }
    }
    Ok(out)
}

/// Outcome of reading one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRead {
    /// A complete, newline-terminated line of the given length (terminator included).
    Complete(usize),
    /// Trailing bytes with no terminator (a truncated write).
    Partial(usize),
    /// End of input.
    Eof,
}

/// Reads one line into `buf` (cleared first), without its terminator.
pub fn read_line<R: BufRead + ?Sized>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<LineRead> {
    buf.clear();
    let read = reader.read_until(NEWLINE, buf)?;
    if read == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.last() == Some(&NEWLINE) {
        buf.pop();
        Ok(LineRead::Complete(read))
    } else {
        Ok(LineRead::Partial(read))
    }
}

/// Header line of a partition file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// PV the partition belongs to.
    pub pv: String,
    /// Declared sample kind.
    pub kind: SampleKind,
    /// UTC year all event timestamps are relative to.
    pub year: i32,
    /// Elements per sample.
    pub element_count: u32,
    /// Free-form header fields.
    pub fields: BTreeMap<String, String>,
}

impl FileHeader {
    /// Creates a header.
    pub fn new(pv: impl Into<String>, kind: SampleKind, year: i32) -> Self {
        Self {
            pv: pv.into(),
            kind,
            year,
            element_count: 1,
            fields: BTreeMap::new(),
        }
    }

    /// Writes the header payload (unescaped, without CRC).
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&FILE_MAGIC)?;
        writer.write_all(&[FILE_VERSION, self.kind.as_u8()])?;
        writer.write_all(&self.year.to_le_bytes())?;
        writer.write_all(&self.element_count.to_le_bytes())?;
        write_short_string(writer, &self.pv)?;
        write_fields(writer, &self.fields)?;
        Ok(())
    }

    /// Reads the header payload written by [`FileHeader::write_to`].
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != FILE_MAGIC {
            return Err(StoreError::malformed(
                "header",
                format!("invalid magic bytes {:?}", magic),
            ));
        }
        let version = read_u8(reader)?;
        if version != FILE_VERSION {
            return Err(StoreError::malformed(
                "header",
                format!("unsupported version {}", version),
            ));
        }
        let kind = read_kind(reader)?;
        let year = read_i32(reader)?;
        let element_count = read_u32(reader)?;
        let pv = read_short_string(reader)?;
        let fields = read_fields(reader)?;
        Ok(Self {
            pv,
            kind,
            year,
            element_count,
            fields,
        })
    }

    /// Encodes the header as an escaped, newline-terminated line.
    pub fn encode_line(&self) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(64);
        self.write_to(&mut payload)?;
        Ok(seal_line(payload))
    }

    /// Decodes a header line (terminator removed).
    pub fn decode_line(line: &[u8]) -> Result<Self> {
        let payload = open_line(line)?;
        let mut reader = payload.as_slice();
        let header = Self::read_from(&mut reader).map_err(eof_is_malformed)?;
        expect_consumed(reader)?;
        Ok(header)
    }
}

/// Encodes an event as an escaped, newline-terminated line relative to `year`.
pub fn encode_event_line(event: &Event, year: i32) -> Result<Vec<u8>> {
    let (event_year, seconds_into_year) = event.timestamp.year_offset();
    if event_year != year {
        return Err(StoreError::InvalidTimestamp(format!(
            "event at {} does not belong to year {}",
            event.timestamp, year
        )));
    }
    let mut payload = Vec::with_capacity(32);
    payload.extend_from_slice(&seconds_into_year.to_le_bytes());
    payload.extend_from_slice(&event.timestamp.nanos().to_le_bytes());
    payload.extend_from_slice(&event.severity.to_le_bytes());
    payload.extend_from_slice(&event.status.to_le_bytes());
    let flags = if event.actual_change {
        FLAG_ACTUAL_CHANGE
    } else {
        0
    };
    payload.push(flags);
    payload.push(event.value.kind().as_u8());
    write_value(&mut payload, &event.value)?;
    write_fields(&mut payload, &event.fields)?;
    Ok(seal_line(payload))
}

/// Decodes an event line (terminator removed) relative to `year`.
pub fn decode_event_line(line: &[u8], year: i32) -> Result<Event> {
    let payload = open_line(line)?;
    let mut reader = payload.as_slice();
    let event = read_event(&mut reader, year).map_err(eof_is_malformed)?;
    expect_consumed(reader)?;
    Ok(event)
}

fn read_event(reader: &mut &[u8], year: i32) -> Result<Event> {
    let seconds_into_year = read_u32(reader)?;
    let nanos = read_u32(reader)?;
    if nanos >= 1_000_000_000 {
        return Err(StoreError::malformed("event", format!("nanos {} out of range", nanos)));
    }
    let severity = read_i32(reader)?;
    let status = read_i32(reader)?;
    let flags = read_u8(reader)?;
    let kind = read_kind(reader)?;
    let value = read_value(reader, kind)?;
    let fields = read_fields(reader)?;
    Ok(Event {
        timestamp: Timestamp::from_year_offset(year, seconds_into_year, nanos),
        value,
        severity,
        status,
        fields,
        actual_change: flags & FLAG_ACTUAL_CHANGE != 0,
    })
}

fn seal_line(mut payload: Vec<u8>) -> Vec<u8> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);
    payload.extend_from_slice(&hasher.finalize().to_le_bytes());
    let mut line = Vec::with_capacity(payload.len() + 8);
    escape_into(&payload, &mut line);
    line.push(NEWLINE);
    line
}

fn open_line(line: &[u8]) -> Result<Vec<u8>> {
    let mut payload = unescape(line)?;
    if payload.len() < 4 {
        return Err(StoreError::malformed("line", "line shorter than its checksum"));
    }
    let split = payload.len() - 4;
    let expected = u32::from_le_bytes([
        payload[split],
        payload[split + 1],
        payload[split + 2],
        payload[split + 3],
    ]);
    payload.truncate(split);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);
    let actual = hasher.finalize();
    if actual != expected {
        return Err(StoreError::ChecksumMismatch { expected, actual });
    }
    Ok(payload)
}

fn expect_consumed(rest: &[u8]) -> Result<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(StoreError::malformed(
            "line",
            format!("{} trailing bytes", rest.len()),
        ))
    }
}

fn eof_is_malformed(err: StoreError) -> StoreError {
    match err {
        StoreError::IoError(io_err) if io_err.kind() == io::ErrorKind::UnexpectedEof => {
            StoreError::malformed("line", "payload ends early")
        }
        other => other,
    }
}

fn write_value<W: Write>(writer: &mut W, value: &SampleValue) -> Result<()> {
    match value {
        SampleValue::Str(s) => write_long_string(writer, s)?,
        SampleValue::Short(v) | SampleValue::Enum(v) => writer.write_all(&v.to_le_bytes())?,
        SampleValue::Float(v) => writer.write_all(&v.to_le_bytes())?,
        SampleValue::Byte(v) => writer.write_all(&v.to_le_bytes())?,
        SampleValue::Int(v) => writer.write_all(&v.to_le_bytes())?,
        SampleValue::Double(v) => writer.write_all(&v.to_le_bytes())?,
        SampleValue::StrArray(values) => {
            write_len(writer, values.len())?;
            for s in values {
                write_long_string(writer, s)?;
            }
        }
        SampleValue::ShortArray(values) | SampleValue::EnumArray(values) => {
            write_len(writer, values.len())?;
            for v in values {
                writer.write_all(&v.to_le_bytes())?;
            }
        }
        SampleValue::FloatArray(values) => {
            write_len(writer, values.len())?;
            for v in values {
                writer.write_all(&v.to_le_bytes())?;
            }
        }
        SampleValue::ByteArray(values) => {
            write_len(writer, values.len())?;
            for v in values {
                writer.write_all(&v.to_le_bytes())?;
            }
        }
        SampleValue::IntArray(values) => {
            write_len(writer, values.len())?;
            for v in values {
                writer.write_all(&v.to_le_bytes())?;
            }
        }
        SampleValue::DoubleArray(values) => {
            write_len(writer, values.len())?;
            for v in values {
                writer.write_all(&v.to_le_bytes())?;
            }
        }
    }
    Ok(())
}

fn read_value<R: Read>(reader: &mut R, kind: SampleKind) -> Result<SampleValue> {
    let value = match kind {
        SampleKind::ScalarString => SampleValue::Str(read_long_string(reader)?),
        SampleKind::ScalarShort => SampleValue::Short(i16::from_le_bytes(read_array(reader)?)),
        SampleKind::ScalarFloat => SampleValue::Float(f32::from_le_bytes(read_array(reader)?)),
        SampleKind::ScalarEnum => SampleValue::Enum(i16::from_le_bytes(read_array(reader)?)),
        SampleKind::ScalarByte => SampleValue::Byte(i8::from_le_bytes(read_array(reader)?)),
        SampleKind::ScalarInt => SampleValue::Int(read_i32(reader)?),
        SampleKind::ScalarDouble => SampleValue::Double(f64::from_le_bytes(read_array(reader)?)),
        SampleKind::WaveformString => {
            let len = read_len(reader)?;
            let mut values = Vec::with_capacity(len.min(4096));
            for _ in 0..len {
                values.push(read_long_string(reader)?);
            }
            SampleValue::StrArray(values)
        }
        SampleKind::WaveformShort => {
            SampleValue::ShortArray(read_vec(reader, |b: [u8; 2]| i16::from_le_bytes(b))?)
        }
        SampleKind::WaveformEnum => {
            SampleValue::EnumArray(read_vec(reader, |b: [u8; 2]| i16::from_le_bytes(b))?)
        }
        SampleKind::WaveformFloat => {
            SampleValue::FloatArray(read_vec(reader, |b: [u8; 4]| f32::from_le_bytes(b))?)
        }
        SampleKind::WaveformByte => {
            SampleValue::ByteArray(read_vec(reader, |b: [u8; 1]| i8::from_le_bytes(b))?)
        }
        SampleKind::WaveformInt => {
            SampleValue::IntArray(read_vec(reader, |b: [u8; 4]| i32::from_le_bytes(b))?)
        }
        SampleKind::WaveformDouble => {
            SampleValue::DoubleArray(read_vec(reader, |b: [u8; 8]| f64::from_le_bytes(b))?)
        }
    };
    Ok(value)
}

fn read_vec<R: Read, T, const N: usize>(
    reader: &mut R,
    decode: impl Fn([u8; N]) -> T,
) -> Result<Vec<T>> {
    let len = read_len(reader)?;
    let mut values = Vec::with_capacity(len.min(65_536));
    for _ in 0..len {
        values.push(decode(read_array(reader)?));
    }
    Ok(values)
}

fn write_fields<W: Write>(writer: &mut W, fields: &BTreeMap<String, String>) -> Result<()> {
    let count = u16::try_from(fields.len())
        .map_err(|_| StoreError::malformed("fields", "too many field values"))?;
    writer.write_all(&count.to_le_bytes())?;
    for (name, value) in fields {
        write_short_string(writer, name)?;
        write_long_string(writer, value)?;
    }
    Ok(())
}

fn read_fields<R: Read>(reader: &mut R) -> Result<BTreeMap<String, String>> {
    let count = u16::from_le_bytes(read_array(reader)?);
    let mut fields = BTreeMap::new();
    for _ in 0..count {
        let name = read_short_string(reader)?;
        let value = read_long_string(reader)?;
        fields.insert(name, value);
    }
    Ok(fields)
}

fn write_len<W: Write>(writer: &mut W, len: usize) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| StoreError::malformed("value", "array too long"))?;
    writer.write_all(&len.to_le_bytes())?;
    Ok(())
}

fn read_len<R: Read>(reader: &mut R) -> Result<usize> {
    Ok(read_u32(reader)? as usize)
}

fn write_short_string<W: Write>(writer: &mut W, value: &str) -> Result<()> {
    let len = u16::try_from(value.len())
        .map_err(|_| StoreError::malformed("string", "string too long"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

fn write_long_string<W: Write>(writer: &mut W, value: &str) -> Result<()> {
    write_len(writer, value.len())?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

fn read_short_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = u16::from_le_bytes(read_array(reader)?) as usize;
    read_utf8(reader, len)
}

fn read_long_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_len(reader)?;
    read_utf8(reader, len)
}

fn read_utf8<R: Read>(reader: &mut R, len: usize) -> Result<String> {
    let mut bytes = Vec::new();
    reader.take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(StoreError::malformed("string", "string ends early"));
    }
    String::from_utf8(bytes).map_err(|_| StoreError::malformed("string", "invalid UTF-8"))
}

fn read_kind<R: Read>(reader: &mut R) -> Result<SampleKind> {
    let raw = read_u8(reader)?;
    SampleKind::from_u8(raw)
        .ok_or_else(|| StoreError::malformed("line", format!("unknown sample kind {}", raw)))
}

fn read_array<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    Ok(read_array::<R, 1>(reader)?[0])
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(reader)?))
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    Ok(i32::from_le_bytes(read_array(reader)?))
}
