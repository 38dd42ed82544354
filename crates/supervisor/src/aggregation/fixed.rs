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

use crate::{aggregation::AggregatorHandleError, config::ReportingConfig};
use either::Either;
use futures::{pin_mut, StreamExt};
use opentelemetry::metrics::{Counter, Meter};
use querywatch_analytics::{aggregation::AggregationStreamExt, fixed::FixedWindow, Timestamp};
use std::{future::Future, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct FixedAggregationStats {
    pub received_timestamps: Counter<u64>,
    pub late_timestamps: Counter<u64>,
    pub reported_intervals: Counter<u64>,
}

impl FixedAggregationStats {
    pub fn new(meter: Meter) -> Self {
        let received_timestamps = meter
            .u64_counter("querywatch.aggregation.fixed.received.timestamps")
            .with_description("Number of timestamps received by the interval counter")
            .build();
        let late_timestamps = meter
            .u64_counter("querywatch.aggregation.fixed.late.timestamps")
            .with_description("Number of timestamps older than the current interval discarded")
            .build();
        let reported_intervals = meter
            .u64_counter("querywatch.aggregation.fixed.reported.intervals")
            .with_description("Number of completed intervals handed to the report callback")
            .build();
        Self {
            received_timestamps,
            late_timestamps,
            reported_intervals,
        }
    }
}

struct FixedAggregationActor<R> {
    rx: async_channel::Receiver<Timestamp>,
    window: FixedWindow,
    report: Arc<R>,
    stats: FixedAggregationStats,
}

impl<R, Fut> FixedAggregationActor<R>
where
    R: Fn(Timestamp, u64) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn new(
        rx: async_channel::Receiver<Timestamp>,
        window: FixedWindow,
        report: Arc<R>,
        stats: FixedAggregationStats,
    ) -> Self {
        Self {
            rx,
            window,
            report,
            stats,
        }
    }

    async fn run(self) -> anyhow::Result<String> {
        let received = self.stats.received_timestamps.clone();
        let agg = self
            .rx
            .inspect(move |_| received.add(1, &[]))
            .aggregate_timestamps(self.window);
        pin_mut!(agg);

        while let Some(result) = agg.next().await {
            match result {
                Either::Left(completed) => {
                    let window = match completed.window() {
                        Some((start, end)) => format!("[{start}, {end})"),
                        None => format!("[{}, {})", completed.start, completed.end()),
                    };
                    debug!("Reporting {} queries for {window}", completed.count);
                    self.stats.reported_intervals.add(1, &[]);
                    let report = self.report.clone();
                    tokio::spawn(async move {
                        report(completed.start, completed.count).await;
                    });
                }
                Either::Right(late) => {
                    self.stats.late_timestamps.add(1, &[]);
                    warn!("illegal timestamp: {} < {}", late.timestamp, late.watermark);
                }
            }
        }
        // The interval still accumulating is dropped here, unreported
        info!("Interval aggregation input closed, shutting down FixedAggregationActor");
        Ok("Interval aggregation terminated successfully".to_string())
    }
}

/// Producer side of a fixed-interval aggregator.
///
/// Clones share the same input; the actor stops once the input is closed
/// with [`Self::close`] or all senders are dropped.
#[derive(Debug, Clone)]
pub struct FixedAggregatorHandle {
    tx: async_channel::Sender<Timestamp>,
}

impl FixedAggregatorHandle {
    /// Spawn the consumption loop, calling `report(interval_start, count)`
    /// for every completed interval.
    ///
    /// # Panics
    ///
    /// Panics if `config.interval` is zero.
    pub fn new<R, Fut>(
        config: &ReportingConfig,
        report: R,
        stats: Either<Meter, FixedAggregationStats>,
    ) -> (JoinHandle<anyhow::Result<String>>, Self)
    where
        R: Fn(Timestamp, u64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let window = FixedWindow::new(config.interval);
        let (tx, rx) = async_channel::bounded(config.buffer_size);
        let stats = match stats {
            Either::Left(meter) => FixedAggregationStats::new(meter),
            Either::Right(stats) => stats,
        };
        let actor = FixedAggregationActor::new(rx, window, Arc::new(report), stats);
        let join_handle = tokio::spawn(actor.run());
        (join_handle, Self { tx })
    }

    /// Enqueue an arrival, waiting only while the input is full.
    pub async fn send(&self, timestamp: Timestamp) -> Result<(), AggregatorHandleError> {
        self.tx
            .send(timestamp)
            .await
            .map_err(|_| AggregatorHandleError::SendError)
    }

    /// An additional producer for the same input
    pub fn sender(&self) -> async_channel::Sender<Timestamp> {
        self.tx.clone()
    }

    /// Close the input; already queued timestamps are still processed.
    pub fn close(&self) -> bool {
        self.tx.close()
    }
}
