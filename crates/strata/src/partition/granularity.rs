//! Partition granularity and boundary arithmetic.

use crate::error::{Result, StoreError};
use crate::time::{div_floor, CivilTime, SECONDS_PER_DAY};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported partition sizes, ordered from finest to coarsest.
///
/// # Examples
/// ```rust,ignore
/// use alopex_strata::partition::PartitionGranularity;
///
/// let hourly = PartitionGranularity::Hour;
/// assert_eq!(hourly.next_larger(), Some(PartitionGranularity::Day));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PartitionGranularity {
    /// Five-minute partitions.
    FiveMinutes,
    /// Fifteen-minute partitions.
    FifteenMinutes,
    /// Thirty-minute partitions.
    ThirtyMinutes,
    /// One-hour partitions.
    Hour,
    /// One-day partitions.
    Day,
    /// Calendar-month partitions.
    Month,
    /// Calendar-year partitions.
    Year,
}

impl PartitionGranularity {
    /// All granularities from finest to coarsest.
    pub const ALL: [Self; 7] = [
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::Hour,
        Self::Day,
        Self::Month,
        Self::Year,
    ];

    /// Returns the approximate number of seconds covered by one partition.
    ///
    /// Months and years vary in length; the approximation is the longest one.
    pub fn approx_seconds_per_chunk(self) -> i64 {
        match self {
            Self::FiveMinutes => 300,
            Self::FifteenMinutes => 900,
            Self::ThirtyMinutes => 1800,
            Self::Hour => 3600,
            Self::Day => SECONDS_PER_DAY,
            Self::Month => 31 * SECONDS_PER_DAY,
            Self::Year => 366 * SECONDS_PER_DAY,
        }
    }

    /// Returns the next coarser granularity, if any.
    pub fn next_larger(self) -> Option<Self> {
        match self {
            Self::FiveMinutes => Some(Self::FifteenMinutes),
            Self::FifteenMinutes => Some(Self::ThirtyMinutes),
            Self::ThirtyMinutes => Some(Self::Hour),
            Self::Hour => Some(Self::Day),
            Self::Day => Some(Self::Month),
            Self::Month => Some(Self::Year),
            Self::Year => None,
        }
    }

    /// Returns the textual form used in store URLs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FiveMinutes => "PARTITION_5MIN",
            Self::FifteenMinutes => "PARTITION_15MIN",
            Self::ThirtyMinutes => "PARTITION_30MIN",
            Self::Hour => "PARTITION_HOUR",
            Self::Day => "PARTITION_DAY",
            Self::Month => "PARTITION_MONTH",
            Self::Year => "PARTITION_YEAR",
        }
    }

    fn label_components(self) -> usize {
        match self {
            Self::Year => 1,
            Self::Month => 2,
            Self::Day => 3,
            Self::Hour => 4,
            Self::FiveMinutes | Self::FifteenMinutes | Self::ThirtyMinutes => 5,
        }
    }

    /// Returns the first epoch second of the partition containing `epoch_seconds`.
    pub fn partition_start(self, epoch_seconds: i64) -> i64 {
        match self {
            Self::FiveMinutes
            | Self::FifteenMinutes
            | Self::ThirtyMinutes
            | Self::Hour
            | Self::Day => {
                let chunk = self.approx_seconds_per_chunk();
                div_floor(epoch_seconds, chunk).0 * chunk
            }
            Self::Month => {
                let civil = CivilTime::from_epoch_seconds(epoch_seconds);
                month_start(civil.year, civil.month)
            }
            Self::Year => {
                let civil = CivilTime::from_epoch_seconds(epoch_seconds);
                month_start(civil.year, 1)
            }
        }
    }

    /// Returns the first epoch second of the partition after the one containing `epoch_seconds`.
    pub fn next_partition_first_second(self, epoch_seconds: i64) -> i64 {
        let start = self.partition_start(epoch_seconds);
        match self {
            Self::Month => {
                let civil = CivilTime::from_epoch_seconds(start);
                if civil.month == 12 {
                    month_start(civil.year + 1, 1)
                } else {
                    month_start(civil.year, civil.month + 1)
                }
            }
            Self::Year => {
                let civil = CivilTime::from_epoch_seconds(start);
                month_start(civil.year + 1, 1)
            }
            _ => start + self.approx_seconds_per_chunk(),
        }
    }

    /// Returns the last epoch second of the partition before the one containing `epoch_seconds`.
    pub fn previous_partition_last_second(self, epoch_seconds: i64) -> i64 {
        self.partition_start(epoch_seconds) - 1
    }

    /// Returns the exact range covered by the partition containing `epoch_seconds`.
    pub fn partition_range(self, epoch_seconds: i64) -> PartitionRange {
        PartitionRange {
            start: self.partition_start(epoch_seconds),
            end: self.next_partition_first_second(epoch_seconds) - 1,
        }
    }

    /// Builds the UTC label (`YYYY_MM_DD_HH`, ...) of the partition containing `epoch_seconds`.
    pub fn partition_label(self, epoch_seconds: i64) -> String {
        let civil = CivilTime::from_epoch_seconds(self.partition_start(epoch_seconds));
        match self {
            Self::Year => format!("{:04}", civil.year),
            Self::Month => format!("{:04}_{:02}", civil.year, civil.month),
            Self::Day => format!("{:04}_{:02}_{:02}", civil.year, civil.month, civil.day),
            Self::Hour => format!(
                "{:04}_{:02}_{:02}_{:02}",
                civil.year, civil.month, civil.day, civil.hour
            ),
            Self::FiveMinutes | Self::FifteenMinutes | Self::ThirtyMinutes => format!(
                "{:04}_{:02}_{:02}_{:02}_{:02}",
                civil.year, civil.month, civil.day, civil.hour, civil.minute
            ),
        }
    }

    /// Parses a partition label and returns the range it covers.
    ///
    /// A label with a component count that does not belong to this granularity is
    /// rejected; one folder never mixes granularities.
    pub fn parse_label(self, label: &str) -> Result<PartitionRange> {
        let invalid = |reason: &str| StoreError::InvalidPartitionName {
            name: label.to_string(),
            reason: reason.to_string(),
        };

        let components: Vec<&str> = label.split('_').collect();
        if components.len() != self.label_components() {
            return Err(invalid(&format!(
                "expected {} components for {}",
                self.label_components(),
                self
            )));
        }

        let mut numbers = [0_i64; 5];
        for (slot, component) in numbers.iter_mut().zip(&components) {
            if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid("non-numeric component"));
            }
            *slot = component
                .parse::<i64>()
                .map_err(|_| invalid("component out of range"))?;
        }

        let year = i32::try_from(numbers[0]).map_err(|_| invalid("year out of range"))?;
        let month = if components.len() > 1 { numbers[1] } else { 1 };
        let day = if components.len() > 2 { numbers[2] } else { 1 };
        let hour = numbers[3];
        let minute = numbers[4];
        if !(1..=12).contains(&month)
            || !(1..=31).contains(&day)
            || !(0..24).contains(&hour)
            || !(0..60).contains(&minute)
        {
            return Err(invalid("calendar field out of range"));
        }

        let start = CivilTime {
            year,
            month: month as u32,
            day: day as u32,
            hour: hour as u32,
            minute: minute as u32,
            second: 0,
        }
        .to_epoch_seconds();
        if self.partition_start(start) != start {
            return Err(invalid("label is not aligned to a partition boundary"));
        }
        Ok(self.partition_range(start))
    }
}

fn month_start(year: i32, month: u32) -> i64 {
    CivilTime {
        year,
        month,
        day: 1,
        hour: 0,
        minute: 0,
        second: 0,
    }
    .to_epoch_seconds()
}

impl fmt::Display for PartitionGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionGranularity {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|granularity| granularity.as_str() == s)
            .ok_or_else(|| StoreError::ConfigError(format!("unknown partition granularity {}", s)))
    }
}

/// Inclusive range of epoch seconds covered by one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionRange {
    /// First second of the partition.
    pub start: i64,
    /// Last second of the partition.
    pub end: i64,
}

impl PartitionRange {
    /// Returns true if `[start, end]` (inclusive, epoch seconds) intersects this partition.
    pub fn intersects(&self, start: i64, end: i64) -> bool {
        !(self.end < start || self.start > end)
    }
}
