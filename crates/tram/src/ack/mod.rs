// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Feedback from members.
//!
//! - [`AckProcessor`]: ACK/NACK bitmaps, repair scheduling, ceilings.
//! - [`CongestionHandler`]: congestion packets, rate decrease, pruning.
//! - [`wire`]: body codec for both message kinds.

mod congestion;
pub mod events;
mod metrics;
mod processor;
pub mod wire;

pub use congestion::{CongestionHandler, CongestionOutcome};
pub use events::{control_channel, ControlEvent, EventSink};
pub use metrics::{AckMetrics, AckMetricsSnapshot};
pub use processor::{
    AckOutcome, AckProcessor, AckReport, RetransmitDecision, MAX_RETRANSMIT_SUPPRESSION_MS,
};
pub use wire::{AckFlags, AckMessage, CongestionMessage};
