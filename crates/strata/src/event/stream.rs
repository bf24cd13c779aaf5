//! Single-pass event streams.

use crate::error::Result;
use crate::event::{Event, SampleKind};
use serde::{Deserialize, Serialize};

/// Describes what a stream carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescription {
    /// PV name.
    pub pv: String,
    /// Declared sample kind.
    pub kind: SampleKind,
    /// Name of the store (or transform) that produced the stream.
    pub source: String,
    /// Elements per sample; 1 for scalars.
    pub element_count: u32,
}

impl StreamDescription {
    /// Creates a description for a scalar or array stream.
    pub fn new(pv: impl Into<String>, kind: SampleKind, source: impl Into<String>) -> Self {
        Self {
            pv: pv.into(),
            kind,
            source: source.into(),
            element_count: 1,
        }
    }

    /// Sets the element count.
    pub fn with_element_count(mut self, element_count: u32) -> Self {
        self.element_count = element_count;
        self
    }
}

/// A lazy, single-pass, time-ordered sequence of events for one PV.
///
/// Dropping a stream releases every file it still holds open.
pub trait EventStream: Iterator<Item = Result<Event>> + Send {
    /// Returns the description of this stream.
    fn description(&self) -> &StreamDescription;
}

/// A boxed event stream.
pub type BoxedEventStream = Box<dyn EventStream>;

impl<S: EventStream + ?Sized> EventStream for Box<S> {
    fn description(&self) -> &StreamDescription {
        (**self).description()
    }
}

/// Event stream over events already in memory.
#[derive(Debug)]
pub struct VecEventStream {
    description: StreamDescription,
    events: std::vec::IntoIter<Event>,
}

impl VecEventStream {
    /// Creates a stream over the given events.
    pub fn new(description: StreamDescription, events: Vec<Event>) -> Self {
        Self {
            description,
            events: events.into_iter(),
        }
    }

    /// Creates a stream with no events.
    pub fn empty(description: StreamDescription) -> Self {
        Self::new(description, Vec::new())
    }
}

impl Iterator for VecEventStream {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        self.events.next().map(Ok)
    }
}

impl EventStream for VecEventStream {
    fn description(&self) -> &StreamDescription {
        &self.description
    }
}

/// Drains a stream into a vector, stopping at the first error.
pub fn collect_events<S: EventStream + ?Sized>(stream: &mut S) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    for event in stream {
        events.push(event?);
    }
    Ok(events)
}
