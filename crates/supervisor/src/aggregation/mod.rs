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

//! Actor wrappers giving each aggregator its own input queue and task.
//!
//! - `RollingAggregatorHandle` - sliding-window rate detection, fires the
//!   corrective action callback
//! - `FixedAggregatorHandle` - aligned interval counting, fires the report
//!   callback
//!
//! Each actor is the only consumer of its bounded input channel and owns the
//! aggregator state, producers only ever hold the sending side. Callbacks
//! are spawned on the runtime and never awaited by the consumption loop.
//! The actor terminates once its input is closed and drained; there is no
//! other shutdown path.

mod fixed;
mod rolling;

pub use fixed::*;
pub use rolling::*;

#[derive(Debug, Clone, Copy, strum_macros::Display)]
pub enum AggregatorHandleError {
    #[strum(to_string = "aggregator input is closed")]
    SendError,
}

impl std::error::Error for AggregatorHandleError {}
