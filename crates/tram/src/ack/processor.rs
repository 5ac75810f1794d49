// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ACK/NACK processing on a head or the sender.
//!
//! For each ACK from a direct member:
//!
//! 1. Drop it if the sender is not a member, or if it terminates membership.
//! 2. Record the member's flow-control score and subtree flag.
//! 3. On a congestion flag for a new ACK window, lower the rate (sender) or
//!    report upward (head).
//! 4. Without the ACK flag, stop here.
//! 5. Queue a repair for every missing packet, unless one is pending or
//!    went out too recently.
//! 6. Advance the member's last-acked sequence and ceiling, purging the
//!    history when it is full and asking for an early upward ACK when the
//!    group ceiling jumped.
//!
//! Nothing here blocks or does I/O; outbound effects are queued in the
//! packet cache or posted as [`ControlEvent`]s.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use super::congestion::CongestionWindows;
use super::events::{ControlEvent, EventSink};
use super::metrics::AckMetrics;
use super::wire::{AckFlags, AckMessage, CongestionMessage};
use crate::cache::{DataCache, Packet, PacketCache};
use crate::clock::current_time_ms;
use crate::config::TransportProfile;
use crate::error::Result;
use crate::membership::GroupTree;
use crate::rate::RateController;
use crate::seq::SeqNum;

/// Upper bound on the retransmit suppression interval (ms).
pub const MAX_RETRANSMIT_SUPPRESSION_MS: u64 = 100;

/// What happened to one retransmission request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetransmitDecision {
    /// Repair put in the retransmit lane.
    Queued,
    /// A repair of this packet is already queued.
    AlreadyPending,
    /// The packet went out less than the suppression interval ago.
    SentRecently,
    /// Not produced (or not received) yet; the member will ask again.
    Deferred,
    /// Older than anything left in the history.
    Unavailable,
    /// The packet cache is closed.
    Closed,
}

/// Per-ACK tally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AckReport {
    /// Missing packets listed in the bitmap.
    pub missing: u32,
    /// Repairs queued.
    pub queued: u32,
    /// Requests skipped as pending or recent.
    pub suppressed: u32,
    /// Requests for packets not produced yet.
    pub deferred: u32,
    /// Requests for packets already purged.
    pub unavailable: u32,
    /// Congestion flag was acted upon (first report in its ACK window).
    pub congestion: bool,
    /// Early upward ACK requested.
    pub ack_now: bool,
}

/// Result of processing one ACK.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// Sender is not a direct member.
    UnknownMember,
    /// Body failed to decode.
    Malformed,
    /// Member is leaving; left to the membership layer.
    Terminating,
    /// State-only ACK (no ACK flag).
    StateOnly { congestion: bool },
    /// Full ACK processed.
    Processed(AckReport),
}

/// Processes ACKs from direct members.
#[derive(Debug)]
pub struct AckProcessor {
    ack_window: u32,
    max_packet_size: u32,
    is_sender: bool,
    group: Arc<GroupTree>,
    data_cache: Arc<DataCache>,
    packet_cache: Arc<PacketCache>,
    rate: Arc<RateController>,
    events: EventSink,
    congestion_windows: Mutex<CongestionWindows>,
    metrics: Arc<AckMetrics>,
}

impl AckProcessor {
    /// Build a processor for `profile`; fails when the profile is invalid.
    pub fn new(
        profile: &TransportProfile,
        group: Arc<GroupTree>,
        data_cache: Arc<DataCache>,
        packet_cache: Arc<PacketCache>,
        rate: Arc<RateController>,
        events: EventSink,
    ) -> Result<Self> {
        profile.validate()?;
        Ok(Self {
            ack_window: profile.ack_window,
            max_packet_size: profile.max_packet_size,
            is_sender: profile.mode.is_sender(),
            group,
            data_cache,
            packet_cache,
            rate,
            events,
            congestion_windows: Mutex::new(CongestionWindows::new(profile.ack_window)),
            metrics: Arc::new(AckMetrics::new()),
        })
    }

    /// Share a metrics collector with other components.
    pub fn with_metrics(mut self, metrics: Arc<AckMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Get the metrics collector.
    pub fn metrics(&self) -> &Arc<AckMetrics> {
        &self.metrics
    }

    /// Decode and process an ACK body received from `from`.
    pub fn receive_ack_packet(&self, from: SocketAddr, flags: u8, body: &[u8]) -> AckOutcome {
        match AckMessage::decode(AckFlags::from_bits(flags), body) {
            Ok(ack) => self.receive_ack(from, &ack),
            Err(e) => {
                self.metrics.increment_acks_dropped();
                log::debug!("[AckProcessor::receive_ack_packet] dropping ACK from {}: {}", from, e);
                AckOutcome::Malformed
            }
        }
    }

    /// Process a decoded ACK from `from`.
    pub fn receive_ack(&self, from: SocketAddr, ack: &AckMessage) -> AckOutcome {
        let flags = ack.flags;
        let now = current_time_ms();
        let subtree = flags.contains(AckFlags::SUBTREE_FLOW_CONTROL_INFO);

        let terminating = flags.contains(AckFlags::TERMINATE_MEMBERSHIP);
        let known = self.group.with_member_mut(from, |member| {
            member.heard_from(now);
            if !terminating {
                member.set_flow_control_info(ack.flow_control_info, subtree);
                member.set_counts(
                    ack.direct_members,
                    ack.indirect_members,
                    ack.direct_advertising.saturating_add(ack.indirect_advertising),
                );
            }
        });
        if known.is_none() {
            self.metrics.increment_acks_dropped();
            log::debug!("[AckProcessor::receive_ack] no member for {}", from);
            return AckOutcome::UnknownMember;
        }
        if terminating {
            log::debug!("[AckProcessor::receive_ack] terminate membership ACK from {}", from);
            return AckOutcome::Terminating;
        }

        let congestion = flags.contains(AckFlags::CONGESTION) && self.handle_congestion(from, ack);

        if !flags.contains(AckFlags::ACK) {
            return AckOutcome::StateOnly { congestion };
        }

        let mut report = AckReport {
            congestion,
            ..Default::default()
        };
        for seq in ack.missing_sequences() {
            report.missing += 1;
            match self.retransmit(from, seq, now) {
                RetransmitDecision::Queued => report.queued += 1,
                RetransmitDecision::AlreadyPending | RetransmitDecision::SentRecently => {
                    report.suppressed += 1
                }
                RetransmitDecision::Deferred => report.deferred += 1,
                RetransmitDecision::Unavailable => report.unavailable += 1,
                RetransmitDecision::Closed => {}
            }
        }

        // the base is the first missing packet when the bitmap is not empty
        let acked = if ack.bitmap_bits() != 0 {
            ack.base.decrement()
        } else {
            ack.base
        };
        self.group
            .with_member_mut(from, |member| member.advance_last_packet_acked(acked));

        if self.data_cache.is_full() {
            self.group.purge_data_cache(None);
        }

        if let Some(change) = self.group.set_member_ceiling(from, ack.highest_allowed) {
            if !self.is_sender && change.advanced_by() > self.ack_window / 2 {
                log::debug!(
                    "[AckProcessor::receive_ack] sending ACK now, ceiling {} -> {}",
                    change.old_group,
                    change.new_group
                );
                report.ack_now = self.events.post(ControlEvent::SendAckNow);
            }
        }

        self.metrics.record_ack(u64::from(report.missing));
        if report.missing > 0 {
            log::debug!(
                "[AckProcessor::receive_ack] NACK from {} base {} missing {} (queued {}, suppressed {}), flow {}{}",
                from,
                ack.base,
                report.missing,
                report.queued,
                report.suppressed,
                ack.flow_control_info,
                if subtree { ", subtree" } else { "" }
            );
        } else {
            log::trace!(
                "[AckProcessor::receive_ack] ACK from {} through {}, allowed {}",
                from,
                acked,
                ack.highest_allowed
            );
        }
        AckOutcome::Processed(report)
    }

    /// Congestion flag on an ACK. Returns true when it opened a new window.
    fn handle_congestion(&self, from: SocketAddr, ack: &AckMessage) -> bool {
        let Some(window) = self.congestion_windows.lock().admit(ack.base) else {
            self.metrics.increment_congestion_duplicates();
            log::trace!(
                "[AckProcessor::handle_congestion] duplicate report for {} from {}",
                ack.base,
                from
            );
            return false;
        };
        self.metrics.increment_congestion_handled();

        if self.is_sender {
            self.rate.congestion(from);
        } else {
            let report = CongestionMessage {
                seq: ack.base,
                flow_control_info: self.rate.group_flow_control_info(),
                data_rate: u32::try_from(self.rate.preferred_data_rate()).unwrap_or(u32::MAX),
                subtree: self.rate.is_subtree_worse(),
            };
            log::debug!(
                "[AckProcessor::handle_congestion] window {} from {}, reporting upward",
                window,
                from
            );
            self.events.post(ControlEvent::ForwardCongestion(report));
        }
        true
    }

    /// Suppression interval for a packet last sent at `data_rate`.
    fn suppression_ms(&self, data_rate: u64) -> u64 {
        if data_rate == 0 {
            return MAX_RETRANSMIT_SUPPRESSION_MS;
        }
        let interval = u64::from(self.ack_window) * u64::from(self.max_packet_size) * 1000
            / 2
            / data_rate;
        interval.min(MAX_RETRANSMIT_SUPPRESSION_MS)
    }

    /// Queue a repair of `seq` for `member`, subject to suppression.
    pub fn retransmit(&self, member: SocketAddr, seq: SeqNum, now_ms: u64) -> RetransmitDecision {
        let Some(packet) = self.data_cache.get(seq) else {
            let purged = match self.data_cache.lowest_sequence() {
                Some(lowest) => seq.precedes(lowest),
                None => seq.precedes_or_eq(self.group.window().last_known()),
            };
            if purged {
                self.metrics.increment_packets_unavailable();
                log::debug!(
                    "[AckProcessor::retransmit] packet {} for {} no longer cached",
                    seq,
                    member
                );
                self.events
                    .post(ControlEvent::PacketUnavailable { member, seq });
                return RetransmitDecision::Unavailable;
            }
            self.metrics.increment_retransmits_deferred();
            log::trace!(
                "[AckProcessor::retransmit] packet {} for {} not available yet",
                seq,
                member
            );
            return RetransmitDecision::Deferred;
        };

        if packet.is_transmit_pending() {
            self.metrics.increment_retransmits_suppressed();
            return RetransmitDecision::AlreadyPending;
        }

        let interval = self.suppression_ms(packet.data_rate());
        if now_ms.saturating_sub(packet.last_transmit_ms()) < interval {
            self.metrics.increment_retransmits_suppressed();
            log::trace!(
                "[AckProcessor::retransmit] packet {} for {} sent within {} ms",
                seq,
                member,
                interval
            );
            return RetransmitDecision::SentRecently;
        }

        if !packet.try_mark_transmit_pending() {
            self.metrics.increment_retransmits_suppressed();
            return RetransmitDecision::AlreadyPending;
        }
        if let Err(e) = self.packet_cache.put(Packet::Retransmit(Arc::clone(&packet))) {
            packet.clear_transmit_pending();
            log::debug!("[AckProcessor::retransmit] cannot queue packet {}: {}", seq, e);
            return RetransmitDecision::Closed;
        }
        self.metrics.increment_retransmits_queued();
        log::trace!(
            "[AckProcessor::retransmit] retransmitting {} for {}",
            seq,
            member
        );
        RetransmitDecision::Queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ack::events::control_channel;
    use crate::cache::DataPacket;
    use crate::membership::{Member, Mrole};
    use crate::window::SendWindow;
    use crossbeam::channel::Receiver;

    struct Fixture {
        processor: AckProcessor,
        group: Arc<GroupTree>,
        data_cache: Arc<DataCache>,
        packet_cache: Arc<PacketCache>,
        rate: Arc<RateController>,
        events: Receiver<ControlEvent>,
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 4, 0, 1], port))
    }

    fn fixture(profile: TransportProfile) -> Fixture {
        let window = Arc::new(SendWindow::new(profile.congestion_window));
        let data_cache = Arc::new(DataCache::new(profile.data_cache_size, profile.ack_window));
        let group = Arc::new(
            GroupTree::new(profile.max_members, Mrole::MemberEagerHead, window)
                .with_data_cache(Arc::clone(&data_cache)),
        );
        let packet_cache = Arc::new(PacketCache::outbound(0));
        let rate = Arc::new(RateController::new(&profile, Arc::clone(&group)).expect("profile"));
        let (sink, events) = control_channel();
        let processor = AckProcessor::new(
            &profile,
            Arc::clone(&group),
            Arc::clone(&data_cache),
            Arc::clone(&packet_cache),
            Arc::clone(&rate),
            sink,
        )
        .expect("valid profile");
        Fixture {
            processor,
            group,
            data_cache,
            packet_cache,
            rate,
            events,
        }
    }

    fn send(f: &Fixture, first: u32, last: u32) {
        for seq in first..=last {
            let pk = Arc::new(DataPacket::new(SeqNum::new(seq), vec![0; 100]));
            pk.mark_transmitted(1_000, 0, false);
            f.data_cache.insert(pk, true);
            f.group.window().advance_last_known(SeqNum::new(seq));
        }
    }

    fn join(f: &Fixture, port: u16) {
        f.group.add_member(Member::new(addr(port))).expect("join");
    }

    #[test]
    fn test_unknown_member_dropped() {
        let f = fixture(TransportProfile::sender());
        let ack = AckMessage::new(AckFlags::ACK, SeqNum::new(5));
        assert_eq!(f.processor.receive_ack(addr(9), &ack), AckOutcome::UnknownMember);
        assert_eq!(f.processor.metrics().snapshot().acks_dropped, 1);
    }

    #[test]
    fn test_terminate_ignored() {
        let f = fixture(TransportProfile::sender());
        join(&f, 1);
        let ack = AckMessage::new(AckFlags::ACK | AckFlags::TERMINATE_MEMBERSHIP, SeqNum::new(5))
            .with_flow_control_info(50);
        assert_eq!(f.processor.receive_ack(addr(1), &ack), AckOutcome::Terminating);
        let member = f.group.lookup_by_address(addr(1)).expect("member");
        assert_eq!(member.last_packet_acked(), SeqNum::ZERO);
        assert_eq!(member.flow_control_info(), 0);
    }

    #[test]
    fn test_state_only_updates_flow_control() {
        let f = fixture(TransportProfile::sender());
        join(&f, 1);
        let ack = AckMessage::new(AckFlags::SUBTREE_FLOW_CONTROL_INFO, SeqNum::new(5))
            .with_flow_control_info(42);
        assert_eq!(
            f.processor.receive_ack(addr(1), &ack),
            AckOutcome::StateOnly { congestion: false }
        );
        let member = f.group.lookup_by_address(addr(1)).expect("member");
        assert_eq!(member.flow_control_info(), 42);
        assert!(member.is_subtree_flow_control_info());
        assert_eq!(member.last_packet_acked(), SeqNum::ZERO);
    }

    #[test]
    fn test_nack_queues_repairs() {
        let f = fixture(TransportProfile::sender());
        join(&f, 1);
        send(&f, 1, 20);
        let ack = AckMessage::new(AckFlags::ACK, SeqNum::new(10))
            .with_missing(&[0, 2])
            .with_highest_allowed(SeqNum::new(200));

        let outcome = f.processor.receive_ack(addr(1), &ack);
        let AckOutcome::Processed(report) = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert_eq!(report.missing, 2);
        assert_eq!(report.queued, 2);
        assert_eq!(f.packet_cache.retransmit_len(), 2);

        let member = f.group.lookup_by_address(addr(1)).expect("member");
        assert_eq!(member.last_packet_acked(), SeqNum::new(9));
        assert_eq!(member.highest_sequence_allowed(), SeqNum::new(200));

        let first = f.packet_cache.get_non_blocking().expect("repair");
        assert!(first.is_retransmission());
        assert_eq!(first.seq(), Some(SeqNum::new(10)));
    }

    #[test]
    fn test_plain_ack_advances_to_base() {
        let f = fixture(TransportProfile::sender());
        join(&f, 1);
        send(&f, 1, 20);
        let ack = AckMessage::new(AckFlags::ACK, SeqNum::new(20));
        f.processor.receive_ack(addr(1), &ack);
        assert_eq!(
            f.group.lookup_by_address(addr(1)).expect("member").last_packet_acked(),
            SeqNum::new(20)
        );

        // stale ACK never moves it back
        let stale = AckMessage::new(AckFlags::ACK, SeqNum::new(12));
        f.processor.receive_ack(addr(1), &stale);
        assert_eq!(
            f.group.lookup_by_address(addr(1)).expect("member").last_packet_acked(),
            SeqNum::new(20)
        );
        assert_eq!(f.processor.metrics().snapshot().acks, 2);
    }

    #[test]
    fn test_retransmit_suppressed_while_pending() {
        let f = fixture(TransportProfile::sender());
        join(&f, 1);
        send(&f, 1, 5);
        let now = 10_000;
        assert_eq!(f.processor.retransmit(addr(1), SeqNum::new(3), now), RetransmitDecision::Queued);
        assert_eq!(
            f.processor.retransmit(addr(1), SeqNum::new(3), now),
            RetransmitDecision::AlreadyPending
        );
        assert_eq!(f.packet_cache.retransmit_len(), 1);
    }

    #[test]
    fn test_retransmit_suppressed_when_recent() {
        let f = fixture(TransportProfile::sender());
        send(&f, 1, 5);
        let pk = f.data_cache.get(SeqNum::new(2)).expect("cached");
        // 32 * 1454 * 1000 / 2 / 1_000_000 = 23 ms
        pk.mark_transmitted(5_000, 1_000_000, false);
        assert_eq!(
            f.processor.retransmit(addr(1), SeqNum::new(2), 5_020),
            RetransmitDecision::SentRecently
        );
        assert_eq!(
            f.processor.retransmit(addr(1), SeqNum::new(2), 5_023),
            RetransmitDecision::Queued
        );
    }

    #[test]
    fn test_suppression_interval_capped() {
        let f = fixture(TransportProfile::sender());
        assert_eq!(f.processor.suppression_ms(0), 100);
        assert_eq!(f.processor.suppression_ms(1_000), 100);
        assert_eq!(f.processor.suppression_ms(1_000_000), 23);
    }

    #[test]
    fn test_unavailable_and_deferred() {
        let f = fixture(TransportProfile::sender());
        send(&f, 10, 20);
        assert_eq!(
            f.processor.retransmit(addr(1), SeqNum::new(5), 10_000),
            RetransmitDecision::Unavailable
        );
        assert_eq!(
            f.events.try_recv(),
            Ok(ControlEvent::PacketUnavailable {
                member: addr(1),
                seq: SeqNum::new(5)
            })
        );
        assert_eq!(
            f.processor.retransmit(addr(1), SeqNum::new(25), 10_000),
            RetransmitDecision::Deferred
        );
        let snap = f.processor.metrics().snapshot();
        assert_eq!(snap.packets_unavailable, 1);
        assert_eq!(snap.retransmits_deferred, 1);
    }

    #[test]
    fn test_malformed_body_dropped() {
        let f = fixture(TransportProfile::sender());
        join(&f, 1);
        let mut body = AckMessage::new(AckFlags::ACK, SeqNum::new(10)).encode();
        body[0..2].copy_from_slice(&16u16.to_be_bytes());
        body.push(0xff);
        assert_eq!(
            f.processor
                .receive_ack_packet(addr(1), AckFlags::ACK.bits(), &body),
            AckOutcome::Malformed
        );
        assert!(f.packet_cache.is_empty());
    }

    #[test]
    fn test_sender_congestion_deduplicated() {
        let f = fixture(TransportProfile::sender());
        join(&f, 1);
        let ack = AckMessage::new(AckFlags::CONGESTION, SeqNum::new(64));
        assert_eq!(
            f.processor.receive_ack(addr(1), &ack),
            AckOutcome::StateOnly { congestion: true }
        );
        assert!(!f.rate.is_slow_start());
        assert_eq!(
            f.processor.receive_ack(addr(1), &ack),
            AckOutcome::StateOnly { congestion: false }
        );
        assert_eq!(f.rate.metrics().congestion_signals, 1);
    }

    #[test]
    fn test_congestion_deduplicated_across_wraparound() {
        let f = fixture(TransportProfile::sender());
        join(&f, 1);
        let late = AckMessage::new(AckFlags::CONGESTION, SeqNum::new(u32::MAX - 40));
        assert_eq!(
            f.processor.receive_ack(addr(1), &late),
            AckOutcome::StateOnly { congestion: true }
        );

        let wrapped = AckMessage::new(AckFlags::CONGESTION, SeqNum::new(160));
        assert_eq!(
            f.processor.receive_ack(addr(1), &wrapped),
            AckOutcome::StateOnly { congestion: true }
        );
        assert_eq!(
            f.processor.receive_ack(addr(1), &late),
            AckOutcome::StateOnly { congestion: false }
        );
        assert_eq!(f.rate.metrics().congestion_signals, 2);
        let metrics = f.processor.metrics().snapshot();
        assert_eq!(metrics.congestion_handled, 2);
        assert_eq!(metrics.congestion_duplicates, 1);
    }

    #[test]
    fn test_zero_ack_window_rejected() {
        let profile = TransportProfile::sender();
        let window = Arc::new(SendWindow::new(profile.congestion_window));
        let group = Arc::new(GroupTree::new(8, Mrole::MemberEagerHead, window));
        let rate = Arc::new(RateController::new(&profile, Arc::clone(&group)).expect("profile"));
        let (sink, _events) = control_channel();
        let result = AckProcessor::new(
            &profile.with_ack_window(0),
            group,
            Arc::new(DataCache::new(0, 32)),
            Arc::new(PacketCache::outbound(0)),
            rate,
            sink,
        );
        assert!(matches!(result, Err(crate::error::Error::Config(_))));
    }

    #[test]
    fn test_head_forwards_congestion_and_acks_early() {
        let f = fixture(TransportProfile::new());
        join(&f, 1);
        let ack = AckMessage::new(AckFlags::ACK | AckFlags::CONGESTION, SeqNum::new(64))
            .with_highest_allowed(SeqNum::new(200));
        let outcome = f.processor.receive_ack(addr(1), &ack);
        let AckOutcome::Processed(report) = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert!(report.congestion);
        assert!(report.ack_now);
        assert!(matches!(
            f.events.try_recv(),
            Ok(ControlEvent::ForwardCongestion(CongestionMessage { seq, .. })) if seq == SeqNum::new(64)
        ));
        assert_eq!(f.events.try_recv(), Ok(ControlEvent::SendAckNow));
        assert!(f.rate.is_slow_start());
    }

    #[test]
    fn test_full_history_purged_on_ack() {
        let f = fixture(TransportProfile::sender().with_cache_sizes(0, 30));
        join(&f, 1);
        send(&f, 1, 30);
        f.data_cache.purge(SeqNum::new(1), 0);
        assert!(f.data_cache.is_full());

        f.processor
            .receive_ack(addr(1), &AckMessage::new(AckFlags::ACK, SeqNum::new(25)));
        assert!(!f.data_cache.is_full());
        assert_eq!(f.data_cache.len(), f.data_cache.low_water_mark());
    }
}
