//! Binned summary reductions.

use crate::error::Result;
use crate::event::{
    BoxedEventStream, Event, EventStream, SampleKind, SampleValue, StreamDescription,
};
use crate::postprocess::{advances, PostProcessor, Statistic, DEFAULT_SUMMARIZING_INTERVAL};
use crate::time::{div_floor, Timestamp};
use std::collections::VecDeque;

/// Reduces each fixed-width bin to one scalar-double event.
///
/// The event for bin `b` is stamped at the middle of the bin and carries the
/// highest severity seen in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryPostProcessor {
    statistic: Statistic,
    interval_secs: u32,
    fill: bool,
}

impl SummaryPostProcessor {
    /// Creates a reduction; `fill` repeats the previous value across empty bins.
    pub fn new(statistic: Statistic, interval_secs: u32, fill: bool) -> Self {
        Self {
            statistic,
            interval_secs: interval_secs.max(1),
            fill,
        }
    }

    /// Returns the bin width in seconds.
    pub fn interval_secs(&self) -> u32 {
        self.interval_secs
    }
}

impl PostProcessor for SummaryPostProcessor {
    fn identity(&self) -> &'static str {
        self.statistic.identity()
    }

    fn extension(&self) -> String {
        if self.interval_secs == DEFAULT_SUMMARIZING_INTERVAL {
            self.identity().to_string()
        } else {
            format!("{}_{}", self.identity(), self.interval_secs)
        }
    }

    fn wrap(&self, stream: BoxedEventStream) -> BoxedEventStream {
        Box::new(SummaryStream {
            description: summary_description(stream.description()),
            inner: stream,
            statistic: self.statistic,
            interval: i64::from(self.interval_secs),
            fill: self.fill,
            current: None,
            previous_bin: None,
            previous_timestamp: None,
            pending: VecDeque::new(),
            exhausted: false,
        })
    }
}

/// Description of a reduced stream: same PV and source, scalar doubles.
pub(crate) fn summary_description(raw: &StreamDescription) -> StreamDescription {
    StreamDescription::new(raw.pv.clone(), SampleKind::ScalarDouble, raw.source.clone())
}

struct Bin {
    index: i64,
    values: Vec<f64>,
    max_severity: i32,
}

struct SummaryStream {
    description: StreamDescription,
    inner: BoxedEventStream,
    statistic: Statistic,
    interval: i64,
    fill: bool,
    current: Option<Bin>,
    previous_bin: Option<(i64, f64, i32)>,
    previous_timestamp: Option<Timestamp>,
    pending: VecDeque<Event>,
    exhausted: bool,
}

impl SummaryStream {
    fn bin_event(&self, index: i64, value: f64, severity: i32) -> Event {
        let nanos = if self.interval % 2 == 0 { 0 } else { 500_000_000 };
        let secs = index * self.interval + self.interval / 2;
        Event::new(Timestamp::new(secs, nanos), SampleValue::Double(value)).with_severity(severity)
    }

    fn close(&mut self, bin: Bin) {
        let Some(value) = self.statistic.compute(&bin.values) else {
            return;
        };
        if self.fill {
            if let Some((previous, previous_value, previous_severity)) = self.previous_bin {
                for index in previous + 1..bin.index {
                    let event = self.bin_event(index, previous_value, previous_severity);
                    self.pending.push_back(event);
                }
            }
        }
        let event = self.bin_event(bin.index, value, bin.max_severity);
        self.pending.push_back(event);
        self.previous_bin = Some((bin.index, value, bin.max_severity));
    }
}

impl Iterator for SummaryStream {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.exhausted {
                return None;
            }

            let event = match self.inner.next() {
                Some(Ok(event)) => event,
                Some(Err(err)) => return Some(Err(err)),
                None => {
                    self.exhausted = true;
                    if let Some(bin) = self.current.take() {
                        self.close(bin);
                    }
                    continue;
                }
            };
            if !advances(&mut self.previous_timestamp, event.timestamp) {
                continue;
            }

            let (index, _) = div_floor(event.timestamp.epoch_seconds(), self.interval);
            let same_bin = matches!(&self.current, Some(bin) if bin.index == index);
            if !same_bin {
                if let Some(bin) = self.current.take() {
                    self.close(bin);
                }
                self.current = Some(Bin {
                    index,
                    values: Vec::new(),
                    max_severity: i32::MIN,
                });
            }
            if let Some(bin) = self.current.as_mut() {
                bin.max_severity = bin.max_severity.max(event.severity);
                if let Some(value) = event.value.as_f64().filter(|v| !v.is_nan()) {
                    bin.values.push(value);
                }
            }
        }
    }
}

impl EventStream for SummaryStream {
    fn description(&self) -> &StreamDescription {
        &self.description
    }
}
