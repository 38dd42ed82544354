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

use crate::{aggregation::AggregatorHandleError, config::RollingConfig};
use either::Either;
use futures::{pin_mut, StreamExt};
use opentelemetry::metrics::{Counter, Meter};
use querywatch_analytics::{
    aggregation::AggregationStreamExt, rolling::RollingWindow, Timestamp,
};
use std::{future::Future, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RollingAggregationStats {
    pub received_timestamps: Counter<u64>,
    pub late_timestamps: Counter<u64>,
    pub threshold_crossings: Counter<u64>,
}

impl RollingAggregationStats {
    pub fn new(meter: Meter) -> Self {
        let received_timestamps = meter
            .u64_counter("querywatch.aggregation.rolling.received.timestamps")
            .with_description("Number of timestamps received by the rolling window")
            .build();
        let late_timestamps = meter
            .u64_counter("querywatch.aggregation.rolling.late.timestamps")
            .with_description("Number of out-of-order timestamps discarded")
            .build();
        let threshold_crossings = meter
            .u64_counter("querywatch.aggregation.rolling.threshold.crossings")
            .with_description("Number of times the corrective action was fired")
            .build();
        Self {
            received_timestamps,
            late_timestamps,
            threshold_crossings,
        }
    }
}

struct RollingAggregationActor<A> {
    rx: async_channel::Receiver<Timestamp>,
    window: RollingWindow,
    action: Arc<A>,
    stats: RollingAggregationStats,
}

impl<A, Fut> RollingAggregationActor<A>
where
    A: Fn(Timestamp, f64) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn new(
        rx: async_channel::Receiver<Timestamp>,
        window: RollingWindow,
        action: Arc<A>,
        stats: RollingAggregationStats,
    ) -> Self {
        Self {
            rx,
            window,
            action,
            stats,
        }
    }

    async fn run(self) -> anyhow::Result<String> {
        let interval = self.window.interval();
        let threshold = self.window.threshold();
        let received = self.stats.received_timestamps.clone();
        let agg = self
            .rx
            .inspect(move |_| received.add(1, &[]))
            .aggregate_timestamps(self.window);
        pin_mut!(agg);

        while let Some(result) = agg.next().await {
            match result {
                Either::Left(crossing) => {
                    info!(
                        "{}: {}s rolling average {:.1}, above threshold {}",
                        crossing.timestamp, interval, crossing.rolling_average, threshold
                    );
                    self.stats.threshold_crossings.add(1, &[]);
                    let action = self.action.clone();
                    tokio::spawn(async move {
                        action(crossing.timestamp, crossing.rolling_average).await;
                    });
                }
                Either::Right(late) => {
                    self.stats.late_timestamps.add(1, &[]);
                    warn!("illegal timestamp: {} < {}", late.timestamp, late.watermark);
                }
            }
        }
        info!("Rolling aggregation input closed, shutting down RollingAggregationActor");
        Ok("Rolling aggregation terminated successfully".to_string())
    }
}

/// Producer side of a sliding-window aggregator.
///
/// Clones share the same input; the actor stops once the input is closed
/// with [`Self::close`] or all senders are dropped.
#[derive(Debug, Clone)]
pub struct RollingAggregatorHandle {
    tx: async_channel::Sender<Timestamp>,
}

impl RollingAggregatorHandle {
    /// Spawn the consumption loop, calling `action(timestamp, rolling_average)`
    /// on every threshold crossing.
    ///
    /// # Panics
    ///
    /// Panics if `config.interval` is zero.
    pub fn new<A, Fut>(
        config: &RollingConfig,
        action: A,
        stats: Either<Meter, RollingAggregationStats>,
    ) -> (JoinHandle<anyhow::Result<String>>, Self)
    where
        A: Fn(Timestamp, f64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let window = RollingWindow::new(config.interval, config.threshold);
        let (tx, rx) = async_channel::bounded(config.buffer_size);
        let stats = match stats {
            Either::Left(meter) => RollingAggregationStats::new(meter),
            Either::Right(stats) => stats,
        };
        let actor = RollingAggregationActor::new(rx, window, Arc::new(action), stats);
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
