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

//! Supervisor of a local resolver process.
//!
//! A packet capture produces one timestamp per matching DNS query. Every
//! timestamp is fanned out to two aggregators running as independent actors:
//!
//! ```text
//!                         +---------------------------+
//!                    +--->| RollingAggregatorHandle   |---> CorrectiveAction
//!   +---------+      |    +---------------------------+
//!   | Capture |------+
//!   +---------+      |    +---------------------------+
//!                    +--->| FixedAggregatorHandle     |---> StatsStore
//!                         +---------------------------+
//! ```

use crate::{
    action::CorrectiveAction,
    aggregation::{FixedAggregatorHandle, RollingAggregatorHandle},
    capture::{Capture, LineMatcher},
    config::SupervisorConfig,
    store::StatsStore,
};
use either::Either;
use futures_util::{stream::FuturesUnordered, StreamExt};
use querywatch_analytics::Timestamp;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

pub mod action;
pub mod aggregation;
pub mod capture;
pub mod config;
pub mod lock;
pub mod store;

/// Time given to the aggregators to drain their inputs once capture ends
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Wire capture, aggregators, corrective action, and stats store together,
/// and run until the capture process exits or an aggregator fails.
pub async fn init_supervision(
    config: SupervisorConfig,
    meter: opentelemetry::metrics::Meter,
) -> anyhow::Result<()> {
    let store = StatsStore::open(&config.database_path)?;
    let action = Arc::new(CorrectiveAction::from_config(&config.action));

    let (rolling_join, rolling_handle) = RollingAggregatorHandle::new(
        &config.rolling,
        move |timestamp: Timestamp, rolling_average: f64| {
            let action = action.clone();
            async move {
                if let Err(err) = action.run(timestamp, rolling_average).await {
                    debug!("Corrective action at {timestamp} ended with: {err}");
                }
            }
        },
        Either::Left(meter.clone()),
    );

    let report_interval = config.reporting.interval;
    let (fixed_join, fixed_handle) = FixedAggregatorHandle::new(
        &config.reporting,
        move |start: Timestamp, count: u64| {
            let store = store.clone();
            async move {
                info!("{start}: {count} queries in the last {report_interval}s");
                if let Err(err) = store.record_async(start, count).await {
                    error!("Failed to record {count} queries for {start}: {err}");
                }
            }
        },
        Either::Left(meter),
    );

    let matcher = LineMatcher::new(&config.capture.process_name, &config.capture.pattern)?;
    let capture = Capture::new(
        config.capture.command.clone(),
        matcher,
        vec![rolling_handle.sender(), fixed_handle.sender()],
    );
    let mut capture_join = tokio::spawn(capture.run());

    let mut join_set = FuturesUnordered::new();
    join_set.push(rolling_join);
    join_set.push(fixed_join);

    tokio::select! {
        capture_ret = &mut capture_join => {
            info!("Capture exited, draining aggregators");
            rolling_handle.close();
            fixed_handle.close();
            let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
                while let Some(join_ret) = join_set.next().await {
                    match join_ret {
                        Ok(Ok(msg)) => info!("{msg}"),
                        Ok(Err(err)) => warn!("Aggregator failed: {err}"),
                        Err(err) => warn!("Aggregator task failed: {err}"),
                    }
                }
            })
            .await;
            if drained.is_err() {
                warn!("Timeout draining aggregators");
            }
            match capture_ret {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(anyhow::anyhow!(err)),
                Err(err) => Err(anyhow::anyhow!(err)),
            }
        }
        join_ret = join_set.next() => {
            warn!("Aggregator exited, shutting down capture");
            capture_join.abort();
            rolling_handle.close();
            fixed_handle.close();
            match join_ret {
                None | Some(Ok(Ok(_))) => Ok(()),
                Some(Err(err)) => Err(anyhow::anyhow!(err)),
                Some(Ok(Err(err))) => Err(err),
            }
        }
    }
}
