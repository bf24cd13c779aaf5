//! Outlier filters over fixed-width bins.

use crate::error::Result;
use crate::event::{BoxedEventStream, Event, EventStream, StreamDescription};
use crate::postprocess::{advances, PostProcessor, DEFAULT_DEVIATIONS, DEFAULT_SUMMARIZING_INTERVAL};
use crate::time::{div_floor, Timestamp};
use std::collections::VecDeque;

/// Passes raw samples through depending on their distance from the bin mean.
///
/// `ignoreflyers` keeps samples within `deviations` standard deviations of the
/// mean of their bin; `flyers` keeps only the samples outside that band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlyerFilter {
    keep_flyers: bool,
    interval_secs: u32,
    deviations: f64,
}

impl FlyerFilter {
    /// Creates a filter.
    pub fn new(keep_flyers: bool, interval_secs: u32, deviations: f64) -> Self {
        Self {
            keep_flyers,
            interval_secs: interval_secs.max(1),
            deviations,
        }
    }
}

impl PostProcessor for FlyerFilter {
    fn identity(&self) -> &'static str {
        if self.keep_flyers {
            "flyers"
        } else {
            "ignoreflyers"
        }
    }

    fn extension(&self) -> String {
        if self.interval_secs == DEFAULT_SUMMARIZING_INTERVAL
            && self.deviations == DEFAULT_DEVIATIONS
        {
            self.identity().to_string()
        } else {
            format!("{}_{}_{}", self.identity(), self.interval_secs, self.deviations)
        }
    }

    fn wrap(&self, stream: BoxedEventStream) -> BoxedEventStream {
        Box::new(FlyerStream {
            description: stream.description().clone(),
            inner: stream,
            filter: *self,
            bin: None,
            buffered: Vec::new(),
            previous: None,
            ready: VecDeque::new(),
            exhausted: false,
        })
    }
}

struct FlyerStream {
    description: StreamDescription,
    inner: BoxedEventStream,
    filter: FlyerFilter,
    bin: Option<i64>,
    buffered: Vec<(Event, f64)>,
    previous: Option<Timestamp>,
    ready: VecDeque<Event>,
    exhausted: bool,
}

impl FlyerStream {
    fn flush_bin(&mut self) {
        let buffered = std::mem::take(&mut self.buffered);
        if buffered.is_empty() {
            return;
        }
        let n = buffered.len() as f64;
        let mean = buffered.iter().map(|(_, v)| v).sum::<f64>() / n;
        let std = if buffered.len() < 2 {
            0.0
        } else {
            (buffered.iter().map(|(_, v)| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        };
        let cutoff = self.filter.deviations * std;
        for (event, value) in buffered {
            let inside = (value - mean).abs() <= cutoff;
            if inside != self.filter.keep_flyers {
                self.ready.push_back(event);
            }
        }
    }
}

impl Iterator for FlyerStream {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.ready.pop_front() {
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
                    self.flush_bin();
                    continue;
                }
            };
            if !advances(&mut self.previous, event.timestamp) {
                continue;
            }
            let Some(value) = event.value.as_f64().filter(|v| !v.is_nan()) else {
                continue;
            };
            let (index, _) = div_floor(
                event.timestamp.epoch_seconds(),
                i64::from(self.filter.interval_secs),
            );
            if self.bin != Some(index) {
                self.flush_bin();
                self.bin = Some(index);
            }
            self.buffered.push((event, value));
        }
    }
}

impl EventStream for FlyerStream {
    fn description(&self) -> &StreamDescription {
        &self.description
    }
}

#[cfg(test)]
mod tests {
    use crate::event::collect_events;
    use crate::postprocess::post_processor_for;
    use crate::postprocess::tests::raw_stream;

    fn values(directive: &str, samples: &[(i64, f64)]) -> Vec<f64> {
        let mut stream = post_processor_for(directive).unwrap().wrap(raw_stream(samples));
        collect_events(&mut stream)
            .unwrap()
            .into_iter()
            .filter_map(|e| e.value.as_f64())
            .collect()
    }

    #[test]
    fn test_flyers_and_ignoreflyers_partition_the_input() {
        let mut samples: Vec<(i64, f64)> = (0..20).map(|i| (i, 10.0)).collect();
        samples.push((20, 1000.0));
        samples.extend((21..40).map(|i| (i, 10.0)));

        let kept = values("ignoreflyers_60_2", &samples);
        let dropped = values("flyers_60_2", &samples);
        assert_eq!(kept.len(), 39);
        assert!(kept.iter().all(|v| *v == 10.0));
        assert_eq!(dropped, vec![1000.0]);
    }

    #[test]
    fn test_bins_are_judged_separately() {
        let samples = [(0, 1.0), (1, 1.0), (60, 500.0), (61, 500.0)];
        assert_eq!(values("ignoreflyers_60", &samples).len(), 4);
        assert!(values("flyers_60", &samples).is_empty());
    }
}
