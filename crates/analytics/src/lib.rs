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

//! Streaming aggregation of second-granularity arrival timestamps.
//!
//! - [`rolling::RollingWindow`]: per-second sliding window that emits a
//!   one-shot [`rolling::ThresholdCrossing`] when the windowed rate exceeds a
//!   threshold
//! - [`fixed::FixedWindow`]: calendar-aligned buckets, emitting an
//!   [`fixed::IntervalCount`] each time a bucket completes

pub mod aggregation;
pub mod fixed;
pub mod rolling;

pub use aggregation::{LateTimestamp, Timestamp, TimestampAggregator};
