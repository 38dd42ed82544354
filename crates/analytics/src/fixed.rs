// Copyright (C) 2025-present The QueryWatch Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Calendar-aligned interval counting.
//!
//! [`FixedWindow`] counts arrivals in fixed-width buckets whose start is a
//! multiple of the bucket width. A bucket is emitted as an [`IntervalCount`]
//! only when an arrival falls into a later bucket; the bucket that is still
//! accumulating when the input ends is never emitted.

use crate::aggregation::{LateTimestamp, Timestamp, TimestampAggregator};
use chrono::{DateTime, Utc};
use either::Either;
use tracing::debug;

/// A time window defined by a start and (noninclusive) end timestamp
pub type Window = (DateTime<Utc>, DateTime<Utc>);

/// Start of the `interval`-aligned bucket containing `timestamp`.
///
/// Floors towards negative infinity, so negative timestamps align to the
/// bucket below them.
#[inline]
pub fn aligned_start(timestamp: Timestamp, interval: u32) -> Timestamp {
    let interval = i64::from(interval);
    timestamp - (timestamp % interval + interval) % interval
}

/// Number of arrivals in a completed bucket
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct IntervalCount {
    pub start: Timestamp,
    pub interval: u32,
    pub count: u64,
}

impl IntervalCount {
    pub fn end(&self) -> Timestamp {
        self.start + i64::from(self.interval)
    }

    /// The bucket as UTC date times, `None` if out of chrono's range
    pub fn window(&self) -> Option<Window> {
        let start = DateTime::from_timestamp(self.start, 0)?;
        let end = DateTime::from_timestamp(self.end(), 0)?;
        Some((start, end))
    }
}

#[derive(Debug, Clone)]
pub struct FixedWindow {
    interval: u32,
    /// `None` until the first arrival opens a bucket
    bucket_start: Option<Timestamp>,
    bucket_count: u64,
}

impl FixedWindow {
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    pub fn new(interval: u32) -> Self {
        assert!(interval > 0, "fixed window interval must be positive");
        Self {
            interval,
            bucket_start: None,
            bucket_count: 0,
        }
    }

    pub const fn interval(&self) -> u32 {
        self.interval
    }

    pub const fn bucket_start(&self) -> Option<Timestamp> {
        self.bucket_start
    }

    pub const fn bucket_count(&self) -> u64 {
        self.bucket_count
    }
}

impl TimestampAggregator for FixedWindow {
    type Output = IntervalCount;

    fn process(&mut self, timestamp: Timestamp) -> Option<Either<IntervalCount, LateTimestamp>> {
        if let Some(bucket_start) = self.bucket_start {
            if timestamp < bucket_start {
                return Some(Either::Right(LateTimestamp {
                    timestamp,
                    watermark: bucket_start,
                }));
            }
        }
        let start = aligned_start(timestamp, self.interval);
        let completed = match self.bucket_start {
            Some(bucket_start) if start <= bucket_start => None,
            previous => {
                let completed = previous.map(|bucket_start| IntervalCount {
                    start: bucket_start,
                    interval: self.interval,
                    count: self.bucket_count,
                });
                if let Some(count) = &completed {
                    debug!(
                        "{}-{}: {}s count {}",
                        count.start,
                        count.end(),
                        self.interval,
                        count.count
                    );
                }
                self.bucket_start = Some(start);
                self.bucket_count = 0;
                completed.map(Either::Left)
            }
        };
        self.bucket_count += 1;
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::AggregationIterExt;
    use chrono::TimeZone;

    #[test]
    #[should_panic(expected = "interval must be positive")]
    fn test_zero_interval_panics() {
        let _ = FixedWindow::new(0);
    }

    #[test]
    fn test_aligned_start() {
        assert_eq!(aligned_start(0, 60), 0);
        assert_eq!(aligned_start(59, 60), 0);
        assert_eq!(aligned_start(60, 60), 60);
        assert_eq!(aligned_start(1738671601, 60), 1738671600);
        assert_eq!(aligned_start(-1, 60), -60);
        assert_eq!(aligned_start(-60, 60), -60);
        assert_eq!(aligned_start(7, 1), 7);
    }

    #[test]
    fn test_reports_completed_buckets_only() {
        let input: Vec<Timestamp> = vec![10, 20, 59, 61, 119, 125];
        let mut window = FixedWindow::new(60);
        let mut reports = vec![];
        for ts in input {
            let result = window.process(ts);
            if ts == 61 {
                assert_eq!(
                    result,
                    Some(Either::Left(IntervalCount {
                        start: 0,
                        interval: 60,
                        count: 3,
                    }))
                );
            }
            reports.extend(result.and_then(|x| x.left()));
        }
        assert_eq!(
            reports,
            vec![
                IntervalCount {
                    start: 0,
                    interval: 60,
                    count: 3,
                },
                IntervalCount {
                    start: 60,
                    interval: 60,
                    count: 2,
                },
            ]
        );
        // [120, 180) is still accumulating and is never reported
        assert_eq!(window.bucket_start(), Some(120));
        assert_eq!(window.bucket_count(), 1);
    }

    #[test]
    fn test_no_report_within_same_bucket() {
        let mut window = FixedWindow::new(60);
        for ts in [1738671600, 1738671601, 1738671601, 1738671659] {
            assert_eq!(window.process(ts), None);
        }
        assert_eq!(window.bucket_start(), Some(1738671600));
        assert_eq!(window.bucket_count(), 4);
    }

    #[test]
    fn test_skipped_buckets_are_not_reported() {
        let input: Vec<Timestamp> = vec![70, 100, 400];
        let results: Vec<_> = input
            .into_iter()
            .aggregate_timestamps(FixedWindow::new(60))
            .collect();
        // Nothing arrived in [120, 360), only the last non-empty bucket closes
        assert_eq!(
            results,
            vec![Either::Left(IntervalCount {
                start: 60,
                interval: 60,
                count: 2,
            })]
        );
    }

    #[test]
    fn test_late_timestamp_discarded() {
        let mut window = FixedWindow::new(60);
        window.process(130);
        window.process(150);
        let result = window.process(119);
        assert_eq!(
            result,
            Some(Either::Right(LateTimestamp {
                timestamp: 119,
                watermark: 120,
            }))
        );
        assert_eq!(window.bucket_start(), Some(120));
        assert_eq!(window.bucket_count(), 2);
    }

    #[test]
    fn test_older_timestamp_in_current_bucket_is_counted() {
        let mut window = FixedWindow::new(60);
        window.process(150);
        // Older than the last arrival but inside the active bucket
        assert_eq!(window.process(125), None);
        assert_eq!(window.bucket_count(), 2);
    }

    #[test]
    fn test_interval_count_window() {
        let count = IntervalCount {
            start: 1735689600,
            interval: 60,
            count: 7,
        };
        assert_eq!(count.end(), 1735689660);
        assert_eq!(
            count.window(),
            Some((
                Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 1, 1, 0, 1, 0).unwrap(),
            ))
        );
    }
}
