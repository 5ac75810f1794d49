// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Rate control.
//!
//! - [`RateController`]: slow start, window-driven steady state and
//!   congestion handling for the transmit rate.
//! - [`AverageRate`]: trailing-horizon average of bytes transferred.
//! - Flow-control scores and prune-candidate selection.

mod average;
mod controller;
pub mod flow_control;
pub mod pruning;

pub use average::AverageRate;
pub use controller::{RateController, RateControllerMetrics, RateSnapshot, MIN_RATE_INCREMENT};
pub use flow_control::FlowControlScore;
pub use pruning::PruningPolicy;
