//! Time-position search inside one partition file.
//!
//! The search is a bounded binary search over byte offsets. Each probe skips to the
//! first line boundary at or after the probe offset, reads the two following lines and
//! asks a [`CompareEventLine`] which way to go. The probe budget is fixed so a corrupt
//! or non-monotonic file can never stall a reader.

use crate::codec::{decode_event_line, read_line, LineRead, NEWLINE};
use crate::error::{Result, StoreError};
use crate::time::Timestamp;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};

/// Maximum number of probes before the search gives up.
pub const MAX_ITERATIONS: usize = 1000;

/// Verdict of a comparison at one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The target lies before the first line.
    GoLeft,
    /// The target lies at or after the second line.
    GoRight,
    /// The two lines bracket the target.
    StayWhereYouAre,
}

/// Three-way comparison of two consecutive lines against a target.
pub trait CompareEventLine {
    /// Compares `line1` and the line after it (absent at end of data).
    fn compare(&self, line1: &[u8], line2: Option<&[u8]>) -> Result<Direction>;
}

/// Compares event lines of one partition against a target timestamp.
///
/// Lines bracket the target when `line1 <= target < line2`; a missing `line2`
/// counts as later than any target.
#[derive(Debug, Clone, Copy)]
pub struct TimestampComparator {
    target: Timestamp,
    year: i32,
}

impl TimestampComparator {
    /// Creates a comparator for a partition whose header declares `year`.
    pub fn new(target: Timestamp, year: i32) -> Self {
        Self { target, year }
    }
}

impl CompareEventLine for TimestampComparator {
    fn compare(&self, line1: &[u8], line2: Option<&[u8]>) -> Result<Direction> {
        let first = decode_event_line(line1, self.year)?.timestamp;
        if first > self.target {
            return Ok(Direction::GoLeft);
        }
        let Some(line2) = line2 else {
            return Ok(Direction::StayWhereYouAre);
        };
        if decode_event_line(line2, self.year)?.timestamp <= self.target {
            Ok(Direction::GoRight)
        } else {
            Ok(Direction::StayWhereYouAre)
        }
    }
}

struct LinePair {
    line_start: u64,
    line1: Option<Vec<u8>>,
    line2: Option<Vec<u8>>,
}

/// Bounded binary search for a byte position.
///
/// # Examples
/// ```rust,ignore
/// use alopex_strata::search::{PositionSearch, TimestampComparator};
///
/// let file = std::fs::File::open(path)?;
/// let size = file.metadata()?.len();
/// let mut search = PositionSearch::new(file, size).with_start_position(header_end);
/// if let Some(position) = search.seek(&TimestampComparator::new(target, 2012))? {
///     // the next line at `position` is the last event at or before `target`
/// }
/// ```
pub struct PositionSearch<R> {
    reader: R,
    size: u64,
    start_position: u64,
    max_iterations: usize,
}

impl<R: Read + Seek> PositionSearch<R> {
    /// Creates a search over `size` bytes of `reader`.
    pub fn new(reader: R, size: u64) -> Self {
        Self {
            reader,
            size,
            start_position: 0,
            max_iterations: MAX_ITERATIONS,
        }
    }

    /// Sets the offset the search starts from.
    ///
    /// The line that contains this offset is never considered; pass the offset of a
    /// header's terminating newline to search only the lines after it.
    pub fn with_start_position(mut self, start_position: u64) -> Self {
        self.start_position = start_position;
        self
    }

    /// Overrides the probe budget.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Searches for the line pair bracketing the comparator's target.
    ///
    /// Returns the offset of the first byte of the first line of the pair, or `None`
    /// when no pair brackets the target (including empty and single-line inputs).
    pub fn seek<C: CompareEventLine + ?Sized>(&mut self, comparator: &C) -> Result<Option<u64>> {
        if self.size == 0 {
            return Ok(None);
        }

        let (found, last_go_right) = self.binary_search(comparator)?;
        if found.is_some() {
            return Ok(found);
        }

        let fallback = if last_go_right == 0 && self.start_position != 0 {
            self.start_position
        } else {
            last_go_right
        };
        let pair = self.read_pair(fallback)?;
        match (pair.line1, pair.line2) {
            (Some(line1), Some(line2)) if !line1.is_empty() && !line2.is_empty() => {
                match comparator.compare(&line1, Some(&line2))? {
                    Direction::StayWhereYouAre => Ok(Some(pair.line_start)),
                    Direction::GoLeft => Ok(None),
                    // The bisection can stop one pair short of the last line.
                    Direction::GoRight => self.seek_next_pair(pair.line_start, comparator),
                }
            }
            _ => Ok(None),
        }
    }

    /// Compares the pair that starts one line after `line_start`.
    fn seek_next_pair<C: CompareEventLine + ?Sized>(
        &mut self,
        line_start: u64,
        comparator: &C,
    ) -> Result<Option<u64>> {
        let next = self.read_pair(line_start)?;
        match next.line1 {
            Some(line1) if !line1.is_empty() => {
                match comparator.compare(&line1, next.line2.as_deref())? {
                    Direction::StayWhereYouAre => Ok(Some(next.line_start)),
                    Direction::GoLeft | Direction::GoRight => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    fn binary_search<C: CompareEventLine + ?Sized>(
        &mut self,
        comparator: &C,
    ) -> Result<(Option<u64>, u64)> {
        let mut min = self.start_position as i64;
        let mut max = self.size as i64 - 1;
        let mut mid = min;
        let mut last_go_right = 0_i64;
        let mut remaining = self.max_iterations;

        loop {
            if remaining == 0 {
                return Err(StoreError::SearchNonConvergence {
                    iterations: self.max_iterations,
                    min: min.max(0) as u64,
                    mid: mid.max(0) as u64,
                    max: max.max(0) as u64,
                });
            }
            mid = min + (max - min) / 2;
            let step = self
                .read_pair(mid.max(0) as u64)
                .and_then(|pair| match pair.line1 {
                    Some(line1) if !line1.is_empty() => {
                        let direction = comparator.compare(&line1, pair.line2.as_deref())?;
                        Ok(Some((direction, pair.line_start)))
                    }
                    _ => Ok(None),
                })
                .map_err(|err| StoreError::SearchProbe {
                    min: min.max(0) as u64,
                    mid: mid.max(0) as u64,
                    max: max.max(0) as u64,
                    source: Box::new(err),
                })?;
            remaining -= 1;

            match step {
                None => return Ok((None, last_go_right as u64)),
                Some((Direction::GoLeft, _)) => max = mid - 1,
                Some((Direction::GoRight, _)) => {
                    last_go_right = mid;
                    min = mid + 1;
                }
                Some((Direction::StayWhereYouAre, line_start)) => {
                    return Ok((Some(line_start), last_go_right as u64))
                }
            }

            if max <= min {
                return Ok((None, last_go_right as u64));
            }
        }
    }

    /// Reads the two complete lines after the first newline at or after `position`.
    fn read_pair(&mut self, position: u64) -> Result<LinePair> {
        self.reader.seek(SeekFrom::Start(position))?;
        let mut reader = BufReader::new(&mut self.reader);

        let mut skipped = Vec::new();
        let read = reader.read_until(NEWLINE, &mut skipped)?;
        if skipped.last() != Some(&NEWLINE) {
            return Ok(LinePair {
                line_start: position + read as u64,
                line1: None,
                line2: None,
            });
        }
        let line_start = position + read as u64;

        let mut line1 = Vec::new();
        if !matches!(read_line(&mut reader, &mut line1)?, LineRead::Complete(_)) {
            return Ok(LinePair {
                line_start,
                line1: None,
                line2: None,
            });
        }
        let mut line2 = Vec::new();
        let line2 = match read_line(&mut reader, &mut line2)? {
            LineRead::Complete(_) => Some(line2),
            LineRead::Partial(_) | LineRead::Eof => None,
        };
        Ok(LinePair {
            line_start,
            line1: Some(line1),
            line2,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Compares plain decimal lines.
    struct NumberComparator(i64);

    impl CompareEventLine for NumberComparator {
        fn compare(&self, line1: &[u8], line2: Option<&[u8]>) -> Result<Direction> {
            let parse = |line: &[u8]| -> Result<i64> {
                std::str::from_utf8(line)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| StoreError::malformed("test", "not a number"))
            };
            if parse(line1)? > self.0 {
                return Ok(Direction::GoLeft);
            }
            match line2 {
                Some(line2) => {
                    if parse(line2)? <= self.0 {
                        Ok(Direction::GoRight)
                    } else {
                        Ok(Direction::StayWhereYouAre)
                    }
                }
                None => Ok(Direction::StayWhereYouAre),
            }
        }
    }

    fn numbers_file(values: &[i64]) -> Vec<u8> {
        let mut data = b"header\n".to_vec();
        for value in values {
            data.extend_from_slice(format!("{}\n", value).as_bytes());
        }
        data
    }

    fn line_at(data: &[u8], position: u64) -> String {
        let rest = &data[position as usize..];
        let end = rest.iter().position(|b| *b == b'\n').unwrap();
        String::from_utf8(rest[..end].to_vec()).unwrap()
    }

    fn search(data: &[u8], target: i64) -> Option<String> {
        let mut search = PositionSearch::new(Cursor::new(data.to_vec()), data.len() as u64)
            .with_start_position(6);
        search
            .seek(&NumberComparator(target))
            .unwrap()
            .map(|position| line_at(data, position))
    }

    #[test]
    fn test_brackets_target_between_samples() {
        let values: Vec<i64> = (0..200).map(|i| i * 450).collect();
        let data = numbers_file(&values);
        assert_eq!(search(&data, 600).as_deref(), Some("450"));
        assert_eq!(search(&data, 45_000).as_deref(), Some("45000"));
        assert_eq!(search(&data, 44_999).as_deref(), Some("44550"));
    }

    #[test]
    fn test_first_sample_is_reachable_from_header_newline() {
        let data = numbers_file(&[10, 20, 30]);
        assert_eq!(search(&data, 10).as_deref(), Some("10"));
        assert_eq!(search(&data, 15).as_deref(), Some("10"));
    }

    #[test]
    fn test_target_before_data_is_not_found() {
        let data = numbers_file(&[10, 20, 30, 40]);
        assert_eq!(search(&data, 5), None);
    }

    #[test]
    fn test_empty_and_single_line() {
        let mut empty = PositionSearch::new(Cursor::new(Vec::new()), 0);
        assert_eq!(empty.seek(&NumberComparator(1)).unwrap(), None);

        let single = b"100\n".to_vec();
        let mut one = PositionSearch::new(Cursor::new(single.clone()), single.len() as u64);
        assert_eq!(one.seek(&NumberComparator(100)).unwrap(), None);
    }

    #[test]
    fn test_two_lines_of_different_widths() {
        let data = numbers_file(&[0, 4010]);
        assert_eq!(search(&data, 2000).as_deref(), Some("0"));
        assert_eq!(search(&data, 4010).as_deref(), Some("4010"));
        assert_eq!(search(&data, 9000).as_deref(), Some("4010"));
    }

    #[test]
    fn test_matches_linear_scan_for_every_target() {
        for count in 2..60i64 {
            let layouts: [Vec<i64>; 4] = [
                (0..count).map(|i| i * 450).collect(),
                (0..count).map(|i| i * i * 37).collect(),
                (0..count).map(|i| if i == 0 { 0 } else { 4009 + i }).collect(),
                (0..count).map(|i| 10_i64.pow(i.min(12) as u32)).collect(),
            ];
            for values in layouts {
                let data = numbers_file(&values);
                let last = *values.last().unwrap();
                let targets = values
                    .iter()
                    .flat_map(|v| [v - 1, *v, v + 1])
                    .chain([last + 1000]);
                for target in targets {
                    let expected = values
                        .iter()
                        .filter(|v| **v <= target)
                        .last()
                        .map(|v| v.to_string());
                    assert_eq!(
                        search(&data, target),
                        expected,
                        "{} lines {:?}, target {}",
                        count,
                        &values[..count.min(4) as usize],
                        target
                    );
                }
            }
        }
    }

    #[test]
    fn test_truncated_last_line_is_ignored() {
        let mut data = numbers_file(&[10, 20, 30]);
        data.extend_from_slice(b"4");
        assert_eq!(search(&data, 35).as_deref(), Some("30"));
    }

    #[test]
    fn test_probe_failure_carries_bounds() {
        let data = b"header\n10\nbogus\n30\n".to_vec();
        let mut search = PositionSearch::new(Cursor::new(data.clone()), data.len() as u64)
            .with_start_position(6);
        let err = search.seek(&NumberComparator(25)).unwrap_err();
        assert!(matches!(err, StoreError::SearchProbe { .. }));
    }

    #[test]
    fn test_probe_budget_is_enforced() {
        let values: Vec<i64> = (0..1000).collect();
        let data = numbers_file(&values);
        let mut search = PositionSearch::new(Cursor::new(data.clone()), data.len() as u64)
            .with_start_position(6)
            .with_max_iterations(2);
        let err = search.seek(&NumberComparator(999)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::SearchNonConvergence { iterations: 2, .. }
        ));
    }
}
