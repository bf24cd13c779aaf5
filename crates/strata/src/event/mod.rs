//! Archived samples and the streams that carry them.

pub mod stream;

pub use stream::{collect_events, BoxedEventStream, EventStream, StreamDescription, VecEventStream};

use crate::error::{Result, StoreError};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Type of the value stored in a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SampleKind {
    /// Scalar string.
    ScalarString = 0,
    /// Scalar 16-bit integer.
    ScalarShort = 1,
    /// Scalar 32-bit float.
    ScalarFloat = 2,
    /// Scalar enumeration index.
    ScalarEnum = 3,
    /// Scalar 8-bit integer.
    ScalarByte = 4,
    /// Scalar 32-bit integer.
    ScalarInt = 5,
    /// Scalar 64-bit float.
    ScalarDouble = 6,
    /// Array of strings.
    WaveformString = 7,
    /// Array of 16-bit integers.
    WaveformShort = 8,
    /// Array of 32-bit floats.
    WaveformFloat = 9,
    /// Array of enumeration indices.
    WaveformEnum = 10,
    /// Array of 8-bit integers.
    WaveformByte = 11,
    /// Array of 32-bit integers.
    WaveformInt = 12,
    /// Array of 64-bit floats.
    WaveformDouble = 13,
}

impl SampleKind {
    /// All sample kinds.
    pub const ALL: [Self; 14] = [
        Self::ScalarString,
        Self::ScalarShort,
        Self::ScalarFloat,
        Self::ScalarEnum,
        Self::ScalarByte,
        Self::ScalarInt,
        Self::ScalarDouble,
        Self::WaveformString,
        Self::WaveformShort,
        Self::WaveformFloat,
        Self::WaveformEnum,
        Self::WaveformByte,
        Self::WaveformInt,
        Self::WaveformDouble,
    ];

    /// Creates a SampleKind from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(usize::from(value)).copied()
    }

    /// Returns the raw u8 value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true for array kinds.
    pub fn is_waveform(self) -> bool {
        self.as_u8() >= Self::WaveformString.as_u8()
    }

    /// Returns the textual identifier used in configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScalarString => "scalar_string",
            Self::ScalarShort => "scalar_short",
            Self::ScalarFloat => "scalar_float",
            Self::ScalarEnum => "scalar_enum",
            Self::ScalarByte => "scalar_byte",
            Self::ScalarInt => "scalar_int",
            Self::ScalarDouble => "scalar_double",
            Self::WaveformString => "waveform_string",
            Self::WaveformShort => "waveform_short",
            Self::WaveformFloat => "waveform_float",
            Self::WaveformEnum => "waveform_enum",
            Self::WaveformByte => "waveform_byte",
            Self::WaveformInt => "waveform_int",
            Self::WaveformDouble => "waveform_double",
        }
    }
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| StoreError::UnknownSampleKind(s.to_string()))
    }
}

/// Value carried by one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SampleValue {
    /// Scalar string.
    Str(String),
    /// Scalar 16-bit integer.
    Short(i16),
    /// Scalar 32-bit float.
    Float(f32),
    /// Scalar enumeration index.
    Enum(i16),
    /// Scalar 8-bit integer.
    Byte(i8),
    /// Scalar 32-bit integer.
    Int(i32),
    /// Scalar 64-bit float.
    Double(f64),
    /// Array of strings.
    StrArray(Vec<String>),
    /// Array of 16-bit integers.
    ShortArray(Vec<i16>),
    /// Array of 32-bit floats.
    FloatArray(Vec<f32>),
    /// Array of enumeration indices.
    EnumArray(Vec<i16>),
    /// Array of 8-bit integers.
    ByteArray(Vec<i8>),
    /// Array of 32-bit integers.
    IntArray(Vec<i32>),
    /// Array of 64-bit floats.
    DoubleArray(Vec<f64>),
}

impl SampleValue {
    /// Returns the kind of this value.
    pub fn kind(&self) -> SampleKind {
        match self {
            Self::Str(_) => SampleKind::ScalarString,
            Self::Short(_) => SampleKind::ScalarShort,
            Self::Float(_) => SampleKind::ScalarFloat,
            Self::Enum(_) => SampleKind::ScalarEnum,
            Self::Byte(_) => SampleKind::ScalarByte,
            Self::Int(_) => SampleKind::ScalarInt,
            Self::Double(_) => SampleKind::ScalarDouble,
            Self::StrArray(_) => SampleKind::WaveformString,
            Self::ShortArray(_) => SampleKind::WaveformShort,
            Self::FloatArray(_) => SampleKind::WaveformFloat,
            Self::EnumArray(_) => SampleKind::WaveformEnum,
            Self::ByteArray(_) => SampleKind::WaveformByte,
            Self::IntArray(_) => SampleKind::WaveformInt,
            Self::DoubleArray(_) => SampleKind::WaveformDouble,
        }
    }

    /// Number of elements; 1 for scalars.
    pub fn element_count(&self) -> usize {
        match self {
            Self::StrArray(v) => v.len(),
            Self::ShortArray(v) | Self::EnumArray(v) => v.len(),
            Self::FloatArray(v) => v.len(),
            Self::ByteArray(v) => v.len(),
            Self::IntArray(v) => v.len(),
            Self::DoubleArray(v) => v.len(),
            _ => 1,
        }
    }

    /// Numeric value of a scalar; strings are parsed, arrays yield their first element.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Str(s) => s.trim().parse().ok(),
            Self::Short(v) | Self::Enum(v) => Some(f64::from(*v)),
            Self::Float(v) => Some(f64::from(*v)),
            Self::Byte(v) => Some(f64::from(*v)),
            Self::Int(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            Self::StrArray(v) => v.first().and_then(|s| s.trim().parse().ok()),
            Self::ShortArray(v) | Self::EnumArray(v) => v.first().map(|x| f64::from(*x)),
            Self::FloatArray(v) => v.first().map(|x| f64::from(*x)),
            Self::ByteArray(v) => v.first().map(|x| f64::from(*x)),
            Self::IntArray(v) => v.first().map(|x| f64::from(*x)),
            Self::DoubleArray(v) => v.first().copied(),
        }
    }
}

/// One archived sample.
///
/// # Examples
/// ```rust,ignore
/// use alopex_strata::event::{Event, SampleValue};
/// use alopex_strata::time::Timestamp;
///
/// let event = Event::new(Timestamp::from_epoch_seconds(0), SampleValue::Double(1.5))
///     .with_severity(2)
///     .with_field("HIHI", "10.0");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// When the sample was taken.
    pub timestamp: Timestamp,
    /// Sample value.
    pub value: SampleValue,
    /// Alarm severity.
    pub severity: i32,
    /// Alarm status.
    pub status: i32,
    /// Auxiliary field values (alarm limits, engineering units, ...).
    pub fields: BTreeMap<String, String>,
    /// True when the fields changed in this sample rather than being repeated.
    pub actual_change: bool,
}

impl Event {
    /// Creates an event with no alarm and no fields.
    pub fn new(timestamp: Timestamp, value: SampleValue) -> Self {
        Self {
            timestamp,
            value,
            severity: 0,
            status: 0,
            fields: BTreeMap::new(),
            actual_change: false,
        }
    }

    /// Sets the alarm severity.
    pub fn with_severity(mut self, severity: i32) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the alarm status.
    pub fn with_status(mut self, status: i32) -> Self {
        self.status = status;
        self
    }

    /// Adds an auxiliary field value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets the actual-change marker.
    pub fn with_actual_change(mut self, actual_change: bool) -> Self {
        self.actual_change = actual_change;
        self
    }

    /// Returns the value kind of this event.
    pub fn kind(&self) -> SampleKind {
        self.value.kind()
    }
}
