// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Congestion packets from direct members.
//!
//! Heads relay congestion reports toward the sender, marking them as
//! subtree-derived. The sender lowers its rate. While the sender already
//! runs at the minimum rate, repeated reports make the reporting member a
//! prune candidate.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use super::events::{ControlEvent, EventSink};
use super::metrics::AckMetrics;
use super::wire::CongestionMessage;
use crate::config::TransportProfile;
use crate::error::Result;
use crate::membership::GroupTree;
use crate::rate::RateController;
use crate::seq::SeqNum;

/// Result of handling one congestion packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CongestionOutcome {
    /// Reporter is not a direct member.
    UnknownMember,
    /// Window already handled.
    Duplicate,
    /// Report handled.
    Handled {
        /// Reporter was posted for pruning.
        prune: bool,
        /// Sender rate was lowered (sender only).
        rate_lowered: bool,
        /// Report relayed upward (head only).
        forwarded: bool,
    },
}

/// Last ACK window in which congestion was acted upon.
///
/// Windows are identified by their first sequence number and ordered with
/// wraparound comparison, so deduplication keeps working across the wrap.
#[derive(Debug)]
pub(crate) struct CongestionWindows {
    ack_window: u32,
    last: Option<SeqNum>,
}

impl CongestionWindows {
    /// `ack_window` must be non-zero.
    pub(crate) fn new(ack_window: u32) -> Self {
        Self {
            ack_window,
            last: None,
        }
    }

    /// First sequence number of the window holding `seq`.
    pub(crate) fn window_start(&self, seq: SeqNum) -> SeqNum {
        SeqNum::new(seq.value() - seq.value() % self.ack_window)
    }

    /// Record `seq` and return its window start when that window follows the
    /// last one handled; `None` for a duplicate or older window.
    pub(crate) fn admit(&mut self, seq: SeqNum) -> Option<SeqNum> {
        let start = self.window_start(seq);
        if let Some(last) = self.last {
            if !start.follows(last) {
                return None;
            }
        }
        self.last = Some(start);
        Some(start)
    }
}

#[derive(Debug)]
struct CongestionState {
    windows: CongestionWindows,
    consecutive: u32,
}

/// Handles congestion packets on a head or the sender.
#[derive(Debug)]
pub struct CongestionHandler {
    min_rate: u64,
    prune_rate_threshold: u64,
    max_consecutive: u32,
    decentralized_pruning: bool,
    is_sender: bool,
    group: Arc<GroupTree>,
    rate: Arc<RateController>,
    events: EventSink,
    state: Mutex<CongestionState>,
    metrics: Arc<AckMetrics>,
}

impl CongestionHandler {
    /// Build a handler for `profile`; fails when the profile is invalid.
    pub fn new(
        profile: &TransportProfile,
        group: Arc<GroupTree>,
        rate: Arc<RateController>,
        events: EventSink,
    ) -> Result<Self> {
        profile.validate()?;
        Ok(Self {
            min_rate: profile.min_data_rate,
            prune_rate_threshold: profile.min_data_rate
                + (profile.max_data_rate.saturating_sub(profile.min_data_rate)) / 4,
            max_consecutive: profile.max_consecutive_congestion_count,
            decentralized_pruning: profile.decentralized_pruning,
            is_sender: profile.mode.is_sender(),
            group,
            rate,
            events,
            state: Mutex::new(CongestionState {
                windows: CongestionWindows::new(profile.ack_window),
                consecutive: 0,
            }),
            metrics: Arc::new(AckMetrics::new()),
        })
    }

    /// Share a metrics collector with other components.
    pub fn with_metrics(mut self, metrics: Arc<AckMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Decode and handle a congestion body from `from`.
    pub fn receive_congestion_packet(
        &self,
        from: SocketAddr,
        flags: u8,
        body: &[u8],
    ) -> Option<CongestionOutcome> {
        match CongestionMessage::decode(flags, body) {
            Ok(msg) => Some(self.receive_congestion(from, &msg)),
            Err(e) => {
                log::debug!(
                    "[CongestionHandler::receive_congestion_packet] dropping report from {}: {}",
                    from,
                    e
                );
                None
            }
        }
    }

    /// Handle a decoded congestion report from `from`.
    pub fn receive_congestion(&self, from: SocketAddr, msg: &CongestionMessage) -> CongestionOutcome {
        let known = self.group.with_member_mut(from, |member| {
            if msg.flow_control_info > member.flow_control_info() {
                member.set_flow_control_info(msg.flow_control_info, msg.subtree);
            }
        });
        if known.is_none() {
            log::debug!("[CongestionHandler::receive_congestion] no member for {}", from);
            return CongestionOutcome::UnknownMember;
        }

        let preferred = self.rate.preferred_data_rate();
        let average = self.rate.average_data_rate();
        let (window, consecutive) = {
            let mut state = self.state.lock();
            let Some(window) = state.windows.admit(msg.seq) else {
                drop(state);
                self.metrics.increment_congestion_duplicates();
                log::debug!(
                    "[CongestionHandler::receive_congestion] duplicate report for {} from {}",
                    msg.seq,
                    from
                );
                return CongestionOutcome::Duplicate;
            };
            if preferred <= self.min_rate {
                state.consecutive += 1;
            } else {
                state.consecutive = 0;
            }
            (window, state.consecutive)
        };
        self.metrics.increment_congestion_handled();
        log::debug!(
            "[CongestionHandler::receive_congestion] window {} from {}, flow {}, rate {}",
            window,
            from,
            msg.flow_control_info,
            preferred
        );

        let mut prune = false;
        if preferred <= self.min_rate
            && consecutive >= self.max_consecutive
            && average < self.prune_rate_threshold
            && !msg.subtree
        {
            if self.decentralized_pruning {
                log::info!(
                    "[CongestionHandler::receive_congestion] pruning {}: {} consecutive reports at minimum rate",
                    from,
                    consecutive
                );
                prune = self.events.post(ControlEvent::PruneMember(from));
            } else {
                log::debug!(
                    "[CongestionHandler::receive_congestion] {} would be pruned with decentralized pruning",
                    from
                );
            }
        }

        let mut rate_lowered = false;
        let mut forwarded = false;
        if self.is_sender {
            if preferred < u64::from(msg.data_rate) {
                log::debug!(
                    "[CongestionHandler::receive_congestion] reported rate {} above current {}",
                    msg.data_rate,
                    preferred
                );
            } else {
                self.rate.adjust_rate_down(from);
                rate_lowered = true;
            }
        } else {
            let relayed = CongestionMessage {
                subtree: true,
                ..*msg
            };
            forwarded = self.events.post(ControlEvent::ForwardCongestion(relayed));
        }

        CongestionOutcome::Handled {
            prune,
            rate_lowered,
            forwarded,
        }
    }
}
