// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # TRAM - Tree-based Reliable Multicast core
//!
//! Flow, congestion and membership machinery for a reliable multicast
//! transport where receivers form a repair tree: each head acknowledges to
//! its own head, repairs losses for its direct members, and limits how far
//! the sender may run ahead.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tram::{
//!     DataCache, GroupTree, Mrole, PacketCache, RateController, Result, SendWindow, SeqNum,
//!     TransportProfile,
//! };
//!
//! fn main() -> Result<()> {
//!     let profile = TransportProfile::sender();
//!     profile.validate()?;
//!
//!     let window = Arc::new(SendWindow::new(profile.congestion_window));
//!     let history = Arc::new(DataCache::new(profile.data_cache_size, profile.ack_window));
//!     let group = Arc::new(
//!         GroupTree::new(profile.max_members, Mrole::MemberEagerHead, window)
//!             .with_data_cache(history),
//!     );
//!     let rate = RateController::new(&profile, Arc::clone(&group))?;
//!     let _outbound = PacketCache::outbound(profile.cache_capacity);
//!
//!     println!("ceiling {}", group.window().highest_allowed());
//!     println!("rate {} B/s", rate.actual_data_rate(SeqNum::new(1)));
//!     Ok(())
//! }
//! ```
//!
//! ## Layout
//!
//! ```text
//!   application --put--> PacketCache --OutputDispatcher--> PacketSink
//!                             ^                 |
//!                   retransmissions      DataCache (history)
//!                             |                 |
//!   InboundControl --InputDispatcher--> AckProcessor / CongestionHandler
//!                                               |
//!                                GroupTree ceilings -> SendWindow
//!                                               |
//!                                        RateController
//! ```
//!
//! ## Modules Overview
//!
//! - [`seq`] - wrap-around sequence numbers
//! - [`membership`] - member slots, member records, the group tree
//! - [`cache`] - outbound/inbound queues and the retransmission history
//! - [`rate`] - slow start, window pacing, flow-control scores, pruning
//! - [`ack`] - ACK/NACK and congestion processing
//! - [`dispatch`] - output and input threads

/// ACK, NACK and congestion processing.
pub mod ack;
/// Packet queues and retransmission history.
pub mod cache;
/// Millisecond wall clock.
pub mod clock;
/// Transport profile and validation.
pub mod config;
/// Output and input dispatch threads.
pub mod dispatch;
/// Error types.
pub mod error;
/// Member slots, member records and the group tree.
pub mod membership;
/// Rate and congestion-window control.
pub mod rate;
/// Sequence number arithmetic.
pub mod seq;
/// Send window shared between the group and the rate controller.
pub mod window;

pub use ack::{
    control_channel, AckFlags, AckMessage, AckMetrics, AckOutcome, AckProcessor,
    CongestionHandler, CongestionMessage, CongestionOutcome, ControlEvent, EventSink,
    RetransmitDecision,
};
pub use cache::{ControlPacket, DataCache, DataPacket, Direction, Packet, PacketCache};
pub use config::{ConfigError, TransportMode, TransportProfile};
pub use dispatch::{CancelToken, InboundControl, InputDispatcher, OutputDispatcher, PacketSink};
pub use error::{Error, Result};
pub use membership::{GroupTree, Member, MemberId, MembershipMask, Mrole};
pub use rate::{RateController, RateSnapshot};
pub use seq::SeqNum;
pub use window::SendWindow;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
