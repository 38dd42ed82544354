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

//! Sliding-window rate detection over a per-second histogram.
//!
//! [`RollingWindow`] keeps the hit counts of the last `interval` completed
//! seconds in a fixed-size circular buffer together with their running sum.
//! Every time the input moves to a later second, the sum is compared against
//! `threshold * interval`; the first second above it emits a
//! [`ThresholdCrossing`] and clears the window, so a sustained burst only
//! fires again once a fresh window has accumulated above the threshold.
//!
//! A silent gap longer than the window also clears it, stale seconds never
//! contribute to the sum once traffic resumes.

use crate::aggregation::{LateTimestamp, Timestamp, TimestampAggregator};
use either::Either;
use tracing::debug;

/// Emitted when the rolling sum exceeds `threshold * interval`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdCrossing {
    /// The arrival that moved the window to the crossing second
    pub timestamp: Timestamp,
    /// Sum of the window at the crossing, before it was cleared
    pub rolling_sum: u64,
    /// `rolling_sum / interval`
    pub rolling_average: f64,
}

#[derive(Debug, Clone)]
pub struct RollingWindow {
    interval: u32,
    threshold: u64,
    /// One slot per second of the window
    second_buckets: Box<[u64]>,
    /// Slot of the second currently being filled
    cursor: usize,
    current_second: Timestamp,
    current_second_count: u64,
    rolling_sum: u64,
}

impl RollingWindow {
    /// Create a window of `interval` seconds firing once the per-second
    /// average over the window exceeds `threshold`.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    pub fn new(interval: u32, threshold: u64) -> Self {
        assert!(interval > 0, "rolling window interval must be positive");
        Self {
            interval,
            threshold,
            second_buckets: vec![0; interval as usize].into_boxed_slice(),
            cursor: 0,
            current_second: 0,
            current_second_count: 0,
            rolling_sum: 0,
        }
    }

    pub const fn interval(&self) -> u32 {
        self.interval
    }

    pub const fn threshold(&self) -> u64 {
        self.threshold
    }

    pub const fn current_second(&self) -> Timestamp {
        self.current_second
    }

    pub const fn current_second_count(&self) -> u64 {
        self.current_second_count
    }

    pub const fn rolling_sum(&self) -> u64 {
        self.rolling_sum
    }

    fn limit(&self) -> u64 {
        self.threshold.saturating_mul(u64::from(self.interval))
    }

    fn reset(&mut self, timestamp: Timestamp) {
        debug!(
            "{timestamp}: rolling buffer reset (last timestamp {})",
            self.current_second
        );
        self.second_buckets.fill(0);
        self.cursor = 0;
        self.current_second = timestamp;
        self.current_second_count = 0;
        self.rolling_sum = 0;
    }

    /// Fold the count of the current second into the buffer and move on to
    /// the next second.
    fn advance_second(&mut self) {
        let slot = &mut self.second_buckets[self.cursor];
        self.rolling_sum -= *slot;
        *slot = self.current_second_count;
        self.rolling_sum += self.current_second_count;
        debug!(
            "{}: {} hits this second, {}s rolling sum {}",
            self.current_second, self.current_second_count, self.interval, self.rolling_sum
        );
        self.current_second_count = 0;
        self.cursor = (self.cursor + 1) % self.second_buckets.len();
        self.current_second += 1;
    }
}

impl TimestampAggregator for RollingWindow {
    type Output = ThresholdCrossing;

    fn process(
        &mut self,
        timestamp: Timestamp,
    ) -> Option<Either<ThresholdCrossing, LateTimestamp>> {
        if timestamp < self.current_second {
            return Some(Either::Right(LateTimestamp {
                timestamp,
                watermark: self.current_second,
            }));
        }
        if timestamp > self.current_second.saturating_add(i64::from(self.interval)) {
            // The whole window was quiet
            self.reset(timestamp);
        }
        let same_second = timestamp == self.current_second;
        while timestamp > self.current_second {
            self.advance_second();
        }
        let mut crossing = None;
        if !same_second && self.rolling_sum > self.limit() {
            let rolling_sum = self.rolling_sum;
            crossing = Some(ThresholdCrossing {
                timestamp,
                rolling_sum,
                rolling_average: rolling_sum as f64 / f64::from(self.interval),
            });
            self.reset(timestamp);
        }
        self.current_second_count += 1;
        crossing.map(Either::Left)
    }
}
