//! Post-processors: stream transforms that reduce raw samples.
//!
//! A directive is an identifier optionally followed by `_`-separated arguments:
//!
//! | Directive | Output |
//! | --- | --- |
//! | `mean_3600` | mean of every 3600 s bin |
//! | `firstFill` | first sample of every 900 s bin, repeated across empty bins |
//! | `nth_10` | every 10th raw sample |
//! | `ignoreflyers_900_2.5` | raw samples within 2.5 standard deviations of their bin mean |

mod convert;
mod flyers;
mod stats;
mod summary;

pub use convert::{ConversionFunction, TypeConversion};
pub use flyers::FlyerFilter;
pub use stats::Statistic;
pub use summary::SummaryPostProcessor;

use crate::error::{Result, StoreError};
use crate::event::{BoxedEventStream, Event, EventStream, StreamDescription};
use crate::time::Timestamp;
use std::fmt;
use tracing::debug;

/// Default bin width in seconds.
pub const DEFAULT_SUMMARIZING_INTERVAL: u32 = 900;

/// Default number of standard deviations for flyer detection.
pub const DEFAULT_DEVIATIONS: f64 = 3.0;

/// A stream transform registered under a textual identifier.
pub trait PostProcessor: Send + Sync + fmt::Debug {
    /// Registered identifier, e.g. `mean`.
    fn identity(&self) -> &'static str;

    /// Identifier plus any non-default arguments, e.g. `mean_3600`.
    fn extension(&self) -> String;

    /// Wraps a raw stream.
    fn wrap(&self, stream: BoxedEventStream) -> BoxedEventStream;
}

/// Every identifier the registry understands.
pub const IDENTITIES: [&str; 19] = [
    "firstSample",
    "lastSample",
    "firstFill",
    "lastFill",
    "mean",
    "min",
    "max",
    "median",
    "std",
    "variance",
    "popvariance",
    "count",
    "ncount",
    "jitter",
    "kurtosis",
    "skewness",
    "nth",
    "ignoreflyers",
    "flyers",
];

/// Builds the post-processor named by a directive.
///
/// # Examples
/// ```rust,ignore
/// use alopex_strata::postprocess::post_processor_for;
///
/// let pp = post_processor_for("max_3600")?;
/// assert_eq!(pp.extension(), "max_3600");
/// let reduced = pp.wrap(raw_stream);
/// ```
pub fn post_processor_for(directive: &str) -> Result<Box<dyn PostProcessor>> {
    let unknown = || StoreError::UnknownPostProcessor(directive.to_string());
    let mut parts = directive.split('_');
    let identity = parts.next().filter(|s| !s.is_empty()).ok_or_else(unknown)?;
    let args: Vec<&str> = parts.collect();

    let interval = |args: &[&str]| -> Result<u32> {
        match args.first() {
            None => Ok(DEFAULT_SUMMARIZING_INTERVAL),
            Some(arg) => arg
                .parse::<u32>()
                .ok()
                .filter(|value| *value > 0)
                .ok_or_else(unknown),
        }
    };

    let post_processor: Box<dyn PostProcessor> = match identity {
        "nth" => {
            if args.len() > 1 {
                return Err(unknown());
            }
            Box::new(EveryNth::new(interval(&args)?))
        }
        "ignoreflyers" | "flyers" => {
            if args.len() > 2 {
                return Err(unknown());
            }
            let deviations = match args.get(1) {
                None => DEFAULT_DEVIATIONS,
                Some(arg) => arg
                    .parse::<f64>()
                    .ok()
                    .filter(|value| value.is_finite() && *value > 0.0)
                    .ok_or_else(unknown)?,
            };
            Box::new(FlyerFilter::new(
                identity == "flyers",
                interval(&args)?,
                deviations,
            ))
        }
        "ncount" => {
            if !args.is_empty() {
                return Err(unknown());
            }
            Box::new(TotalCount)
        }
        other => {
            let statistic = Statistic::from_identity(other).ok_or_else(unknown)?;
            if args.len() > 1 {
                return Err(unknown());
            }
            let fill = matches!(other, "firstFill" | "lastFill");
            Box::new(SummaryPostProcessor::new(statistic, interval(&args)?, fill))
        }
    };
    debug!("Resolved post processor {} for {}", post_processor.extension(), directive);
    Ok(post_processor)
}

/// Keeps the first raw sample and every n-th one after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EveryNth {
    n: u32,
}

impl EveryNth {
    /// Creates the filter; `n` must be positive.
    pub fn new(n: u32) -> Self {
        Self { n: n.max(1) }
    }
}

impl PostProcessor for EveryNth {
    fn identity(&self) -> &'static str {
        "nth"
    }

    fn extension(&self) -> String {
        if self.n == DEFAULT_SUMMARIZING_INTERVAL {
            self.identity().to_string()
        } else {
            format!("{}_{}", self.identity(), self.n)
        }
    }

    fn wrap(&self, stream: BoxedEventStream) -> BoxedEventStream {
        Box::new(EveryNthStream {
            description: stream.description().clone(),
            inner: stream,
            n: u64::from(self.n),
            seen: 0,
            previous: None,
        })
    }
}

struct EveryNthStream {
    description: StreamDescription,
    inner: BoxedEventStream,
    n: u64,
    seen: u64,
    previous: Option<Timestamp>,
}

impl Iterator for EveryNthStream {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let event = match self.inner.next()? {
                Ok(event) => event,
                Err(err) => return Some(Err(err)),
            };
            if !advances(&mut self.previous, event.timestamp) {
                continue;
            }
            let index = self.seen;
            self.seen += 1;
            if index % self.n == 0 {
                return Some(Ok(event));
            }
        }
    }
}

impl EventStream for EveryNthStream {
    fn description(&self) -> &StreamDescription {
        &self.description
    }
}

/// Counts every sample and emits the total as one event at the first sample's time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotalCount;

impl PostProcessor for TotalCount {
    fn identity(&self) -> &'static str {
        "ncount"
    }

    fn extension(&self) -> String {
        self.identity().to_string()
    }

    fn wrap(&self, stream: BoxedEventStream) -> BoxedEventStream {
        Box::new(TotalCountStream {
            description: summary::summary_description(stream.description()),
            inner: Some(stream),
        })
    }
}

struct TotalCountStream {
    description: StreamDescription,
    inner: Option<BoxedEventStream>,
}

impl Iterator for TotalCountStream {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        let inner = self.inner.take()?;
        let mut previous = None;
        let mut first = None;
        let mut count = 0u64;
        for event in inner {
            let event = match event {
                Ok(event) => event,
                Err(err) => return Some(Err(err)),
            };
            if !advances(&mut previous, event.timestamp) {
                continue;
            }
            first.get_or_insert(event.timestamp);
            count += 1;
        }
        first.map(|timestamp| {
            Ok(Event::new(
                timestamp,
                crate::event::SampleValue::Double(count as f64),
            ))
        })
    }
}

impl EventStream for TotalCountStream {
    fn description(&self) -> &StreamDescription {
        &self.description
    }
}

/// Records `timestamp` if it is after the previous one; repeated or older samples
/// (which overlapping stores can produce) are dropped by every post-processor.
pub(crate) fn advances(previous: &mut Option<Timestamp>, timestamp: Timestamp) -> bool {
    match previous {
        Some(last) if timestamp <= *last => false,
        _ => {
            *previous = Some(timestamp);
            true
        }
    }
}
