//! Timestamps and civil-calendar arithmetic.
//!
//! Events are stored relative to the start of their UTC year, so this module
//! provides the conversions between epoch seconds and `(year, seconds into year)`
//! as well as the calendar helpers used for partition labels.

use crate::error::{Result, StoreError};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds in one day.
pub const SECONDS_PER_DAY: i64 = 86_400;

const NANOS_PER_SECOND: u32 = 1_000_000_000;

/// A UTC instant with nanosecond resolution.
///
/// Ordering is chronological (seconds first, then nanos).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp {
    secs: i64,
    nanos: u32,
}

impl Timestamp {
    /// Creates a timestamp; nanos beyond one second are carried into seconds.
    pub fn new(secs: i64, nanos: u32) -> Self {
        Self {
            secs: secs + i64::from(nanos / NANOS_PER_SECOND),
            nanos: nanos % NANOS_PER_SECOND,
        }
    }

    /// Creates a timestamp at a whole epoch second.
    pub fn from_epoch_seconds(secs: i64) -> Self {
        Self { secs, nanos: 0 }
    }

    /// Returns the current wall-clock time.
    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => Self::new(elapsed.as_secs() as i64, elapsed.subsec_nanos()),
            Err(_) => Self::default(),
        }
    }

    /// Seconds since the Unix epoch.
    pub fn epoch_seconds(&self) -> i64 {
        self.secs
    }

    /// Sub-second part in nanoseconds.
    pub fn nanos(&self) -> u32 {
        self.nanos
    }

    /// Epoch milliseconds, truncated.
    pub fn epoch_millis(&self) -> i64 {
        self.secs * 1000 + i64::from(self.nanos / 1_000_000)
    }

    /// Returns a timestamp shifted by whole seconds.
    pub fn plus_seconds(&self, seconds: i64) -> Self {
        Self {
            secs: self.secs + seconds,
            nanos: self.nanos,
        }
    }

    /// Returns the UTC year this instant falls in.
    pub fn year(&self) -> i32 {
        year_for_epoch_seconds(self.secs)
    }

    /// Splits the instant into its UTC year and seconds since the start of that year.
    pub fn year_offset(&self) -> (i32, u32) {
        let year = self.year();
        let offset = self.secs - year_start_epoch_seconds(year);
        (year, offset as u32)
    }

    /// Rebuilds an instant from a year-relative representation.
    pub fn from_year_offset(year: i32, seconds_into_year: u32, nanos: u32) -> Self {
        Self::new(
            year_start_epoch_seconds(year) + i64::from(seconds_into_year),
            nanos,
        )
    }

    /// Formats the instant as ISO-8601 with millisecond precision.
    pub fn to_iso8601(&self) -> String {
        match DateTime::<Utc>::from_timestamp(self.secs, self.nanos) {
            Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
            None => format!("{}s", self.secs),
        }
    }

    /// Parses an RFC 3339 / ISO-8601 instant such as `2012-01-01T03:00:00Z`.
    pub fn parse_iso8601(text: &str) -> Result<Self> {
        let parsed = DateTime::parse_from_rfc3339(text)
            .map_err(|err| StoreError::InvalidTimestamp(format!("{}: {}", text, err)))?;
        Ok(Self::new(parsed.timestamp(), parsed.timestamp_subsec_nanos()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

/// Broken-down UTC calendar fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilTime {
    /// Year.
    pub year: i32,
    /// Month, 1-12.
    pub month: u32,
    /// Day of month, 1-31.
    pub day: u32,
    /// Hour, 0-23.
    pub hour: u32,
    /// Minute, 0-59.
    pub minute: u32,
    /// Second, 0-59.
    pub second: u32,
}

impl CivilTime {
    /// Breaks epoch seconds into UTC calendar fields.
    pub fn from_epoch_seconds(epoch_seconds: i64) -> Self {
        let (days, seconds_of_day) = div_floor(epoch_seconds, SECONDS_PER_DAY);
        let (year, month, day) = civil_from_days(days);
        Self {
            year,
            month,
            day,
            hour: (seconds_of_day / 3600) as u32,
            minute: ((seconds_of_day % 3600) / 60) as u32,
            second: (seconds_of_day % 60) as u32,
        }
    }

    /// Converts calendar fields back into epoch seconds.
    pub fn to_epoch_seconds(&self) -> i64 {
        days_from_civil(self.year, self.month, self.day) * SECONDS_PER_DAY
            + i64::from(self.hour) * 3600
            + i64::from(self.minute) * 60
            + i64::from(self.second)
    }
}

/// Epoch seconds of `year-01-01T00:00:00Z`.
pub fn year_start_epoch_seconds(year: i32) -> i64 {
    days_from_civil(year, 1, 1) * SECONDS_PER_DAY
}

/// UTC year containing the given epoch second.
pub fn year_for_epoch_seconds(epoch_seconds: i64) -> i32 {
    let (days, _) = div_floor(epoch_seconds, SECONDS_PER_DAY);
    civil_from_days(days).0
}

pub(crate) fn div_floor(value: i64, divisor: i64) -> (i64, i64) {
    let mut quotient = value / divisor;
    let mut remainder = value % divisor;
    if remainder < 0 {
        quotient -= 1;
        remainder += divisor;
    }
    (quotient, remainder)
}

pub(crate) fn civil_from_days(days: i64) -> (i32, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 {
        z / 146_097
    } else {
        (z - 146_096) / 146_097
    };
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = mp + if mp < 10 { 3 } else { -9 };
    let year = y + if month <= 2 { 1 } else { 0 };
    (year as i32, month as u32, day as u32)
}

pub(crate) fn days_from_civil(year: i32, month: u32, day: u32) -> i64 {
    let y = i64::from(year) - if month <= 2 { 1 } else { 0 };
    let era = (if y >= 0 { y } else { y - 399 }) / 400;
    let yoe = y - era * 400;
    let m = i64::from(month);
    let mp = if m > 2 { m - 3 } else { m + 9 };
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}
