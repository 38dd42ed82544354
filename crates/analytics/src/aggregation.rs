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

//! Shared plumbing for driving second-granularity aggregators over a
//! timestamp source.
//!
//! The main components are:
//! - `TimestampAggregator`: A trait implemented by every aggregator that
//!   consumes one timestamp at a time
//! - `LateTimestamp`: The out-of-order input an aggregator refused
//! - `AggregationAdaptor`: Iterator adapter feeding an iterator of timestamps
//!   into an aggregator
//! - `AggregationStreamAdaptor`: The same adapter over an async `Stream`
//!
//! Both adaptors yield `Either::Left` for every result the aggregator emits
//! and `Either::Right` for every discarded timestamp. Absorbed timestamps
//! produce no item. When the source is exhausted the adaptors stop; the
//! in-progress state of the aggregator is never flushed.
//!
//! Example usage:
//! ```text
//! use querywatch_analytics::{aggregation::AggregationIterExt, fixed::FixedWindow};
//!
//! let completed = vec![10, 20, 59, 61]
//!     .into_iter()
//!     .aggregate_timestamps(FixedWindow::new(60))
//!     .filter_map(|x| x.left()) // Keep only completed intervals
//!     .collect::<Vec<_>>();
//! ```

use either::Either;
use futures_core::Stream;
use pin_project::pin_project;
use std::{
    pin::Pin,
    task::{Context, Poll},
};

/// Seconds since epoch, or any monotonic second-granularity clock
pub type Timestamp = i64;

/// A timestamp older than the aggregator's current position
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LateTimestamp {
    /// The refused input
    pub timestamp: Timestamp,
    /// The aggregator's position when the input arrived
    pub watermark: Timestamp,
}

/// A trait for aggregators consuming one timestamp at a time
pub trait TimestampAggregator {
    type Output;

    /// Feed a single arrival.
    ///
    /// Returns `None` when the arrival was absorbed into the aggregator
    /// state, `Some(Either::Left(_))` when it caused a result to be emitted
    /// and `Some(Either::Right(_))` when it was discarded as out-of-order.
    fn process(&mut self, timestamp: Timestamp)
        -> Option<Either<Self::Output, LateTimestamp>>;
}

/// An iterator adaptor that feeds timestamps to an aggregator and yields
/// what it emits
pub struct AggregationAdaptor<A, I> {
    source: I,
    aggregator: A,
}

impl<A, I> AggregationAdaptor<A, I> {
    fn new(source: I, aggregator: A) -> Self {
        Self { source, aggregator }
    }

    pub fn aggregator(&self) -> &A {
        &self.aggregator
    }

    pub fn into_aggregator(self) -> A {
        self.aggregator
    }
}

impl<A: TimestampAggregator, I: Iterator<Item = Timestamp>> Iterator for AggregationAdaptor<A, I> {
    type Item = Either<A::Output, LateTimestamp>;

    fn next(&mut self) -> Option<Self::Item> {
        for timestamp in self.source.by_ref() {
            if let Some(next) = self.aggregator.process(timestamp) {
                return Some(next);
            }
        }
        None
    }
}

pub trait AggregationIterExt: Iterator<Item = Timestamp> + Sized {
    fn aggregate_timestamps<A: TimestampAggregator>(
        self,
        aggregator: A,
    ) -> AggregationAdaptor<A, Self> {
        AggregationAdaptor::new(self, aggregator)
    }
}

impl<I: Iterator<Item = Timestamp>> AggregationIterExt for I {}

#[pin_project]
pub struct AggregationStreamAdaptor<A, S> {
    #[pin]
    source: S,
    aggregator: A,
}

impl<A, S> AggregationStreamAdaptor<A, S> {
    pub fn new(source: S, aggregator: A) -> Self {
        Self { source, aggregator }
    }
}

impl<A: TimestampAggregator, S: Stream<Item = Timestamp>> Stream for AggregationStreamAdaptor<A, S> {
    type Item = Either<A::Output, LateTimestamp>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            match this.source.as_mut().poll_next(cx) {
                Poll::Ready(Some(timestamp)) => {
                    if let Some(next) = this.aggregator.process(timestamp) {
                        return Poll::Ready(Some(next));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

pub trait AggregationStreamExt: Stream<Item = Timestamp> + Sized {
    fn aggregate_timestamps<A: TimestampAggregator>(
        self,
        aggregator: A,
    ) -> AggregationStreamAdaptor<A, Self> {
        AggregationStreamAdaptor::new(self, aggregator)
    }
}

impl<S: Stream<Item = Timestamp>> AggregationStreamExt for S {}
