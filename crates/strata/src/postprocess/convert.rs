//! Type conversion of stored samples.

use crate::error::{Result, StoreError};
use crate::event::{
    BoxedEventStream, Event, EventStream, SampleKind, SampleValue, StreamDescription,
};
use std::fmt;

/// Per-stream transform applied when a store rewrites a PV's partitions.
pub trait ConversionFunction: Send + Sync + fmt::Debug {
    /// Returns true if streams with this description need converting.
    fn should_convert(&self, description: &StreamDescription) -> bool;

    /// Wraps a stream so that it yields converted events.
    fn convert(&self, stream: BoxedEventStream) -> BoxedEventStream;
}

/// Converts every sample to one sample kind.
///
/// Numeric kinds convert with saturating casts; strings parse as numbers and
/// numbers print as strings. Scalars become one-element arrays and arrays become
/// scalars holding their first element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeConversion {
    target: SampleKind,
}

impl TypeConversion {
    /// Creates a conversion to `target`.
    pub fn new(target: SampleKind) -> Self {
        Self { target }
    }

    /// Returns the kind samples are converted to.
    pub fn target(&self) -> SampleKind {
        self.target
    }

    /// Converts one value.
    pub fn convert_value(&self, value: &SampleValue) -> Result<SampleValue> {
        let elements = elements(value);
        let numbers = || -> Result<Vec<f64>> {
            elements
                .iter()
                .map(|element| match element {
                    Element::Number(n) => Ok(*n),
                    Element::Text(text) => text.trim().parse::<f64>().map_err(|_| {
                        StoreError::ConversionError(format!(
                            "cannot convert {:?} to {}",
                            text, self.target
                        ))
                    }),
                })
                .collect()
        };
        let texts = || -> Vec<String> {
            elements
                .iter()
                .map(|element| match element {
                    Element::Number(n) => n.to_string(),
                    Element::Text(text) => text.clone(),
                })
                .collect()
        };
        let first = |values: Vec<f64>| -> Result<f64> {
            values.first().copied().ok_or_else(|| {
                StoreError::ConversionError(format!(
                    "cannot convert an empty array to {}",
                    self.target
                ))
            })
        };

        let converted = match self.target {
            SampleKind::ScalarString => {
                SampleValue::Str(texts().into_iter().next().unwrap_or_default())
            }
            SampleKind::ScalarShort => SampleValue::Short(first(numbers()?)? as i16),
            SampleKind::ScalarFloat => SampleValue::Float(first(numbers()?)? as f32),
            SampleKind::ScalarEnum => SampleValue::Enum(first(numbers()?)? as i16),
            SampleKind::ScalarByte => SampleValue::Byte(first(numbers()?)? as i8),
            SampleKind::ScalarInt => SampleValue::Int(first(numbers()?)? as i32),
            SampleKind::ScalarDouble => SampleValue::Double(first(numbers()?)?),
            SampleKind::WaveformString => SampleValue::StrArray(texts()),
            SampleKind::WaveformShort => {
                SampleValue::ShortArray(numbers()?.into_iter().map(|v| v as i16).collect())
            }
            SampleKind::WaveformFloat => {
                SampleValue::FloatArray(numbers()?.into_iter().map(|v| v as f32).collect())
            }
            SampleKind::WaveformEnum => {
                SampleValue::EnumArray(numbers()?.into_iter().map(|v| v as i16).collect())
            }
            SampleKind::WaveformByte => {
                SampleValue::ByteArray(numbers()?.into_iter().map(|v| v as i8).collect())
            }
            SampleKind::WaveformInt => {
                SampleValue::IntArray(numbers()?.into_iter().map(|v| v as i32).collect())
            }
            SampleKind::WaveformDouble => SampleValue::DoubleArray(numbers()?),
        };
        Ok(converted)
    }
}

impl ConversionFunction for TypeConversion {
    fn should_convert(&self, description: &StreamDescription) -> bool {
        description.kind != self.target
    }

    fn convert(&self, stream: BoxedEventStream) -> BoxedEventStream {
        let mut description = stream.description().clone();
        description.kind = self.target;
        if !self.target.is_waveform() {
            description.element_count = 1;
        }
        Box::new(ConvertedStream {
            description,
            inner: stream,
            conversion: *self,
        })
    }
}

enum Element {
    Number(f64),
    Text(String),
}

fn elements(value: &SampleValue) -> Vec<Element> {
    match value {
        SampleValue::Str(s) => vec![Element::Text(s.clone())],
        SampleValue::StrArray(values) => values.iter().cloned().map(Element::Text).collect(),
        SampleValue::ShortArray(values) | SampleValue::EnumArray(values) => {
            values.iter().map(|v| Element::Number(f64::from(*v))).collect()
        }
        SampleValue::FloatArray(values) => {
            values.iter().map(|v| Element::Number(f64::from(*v))).collect()
        }
        SampleValue::ByteArray(values) => {
            values.iter().map(|v| Element::Number(f64::from(*v))).collect()
        }
        SampleValue::IntArray(values) => {
            values.iter().map(|v| Element::Number(f64::from(*v))).collect()
        }
        SampleValue::DoubleArray(values) => values.iter().map(|v| Element::Number(*v)).collect(),
        scalar => scalar
            .as_f64()
            .map(Element::Number)
            .into_iter()
            .collect(),
    }
}

struct ConvertedStream {
    description: StreamDescription,
    inner: BoxedEventStream,
    conversion: TypeConversion,
}

impl Iterator for ConvertedStream {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        let event = self.inner.next()?;
        Some(event.and_then(|mut event| {
            event.value = self.conversion.convert_value(&event.value)?;
            Ok(event)
        }))
    }
}

impl EventStream for ConvertedStream {
    fn description(&self) -> &StreamDescription {
        &self.description
    }
}
