// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Window-driven rate controller.
//!
//! Called once per transmitted data packet. The rate ramps up in slow start
//! until the window is first exhausted (or the maximum rate is reached),
//! then follows the measured average rate once per ACK window, increasing
//! only while the open window keeps growing.
//!
//! ```text
//!   slow start ──(window exhausted | max rate | congestion)──> steady state
//!                                                               │      ▲
//!                                                  window closed│      │reopened:
//!                                                               ▼      │rate = average
//!                                                             frozen ──┘
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::average::AverageRate;
use super::flow_control::{self, FlowControlScore};
use super::pruning::{self, PruningPolicy};
use crate::cache::DataPacket;
use crate::clock::current_time_ms;
use crate::config::TransportProfile;
use crate::error::Result;
use crate::membership::GroupTree;
use crate::seq::SeqNum;
use crate::window::SendWindow;

/// Smallest rate increment (bytes/sec).
pub const MIN_RATE_INCREMENT: u64 = 2_500;

/// Slow-start increment growth per packet (bytes/sec).
const SLOW_START_INCREMENT_STEP: u64 = 1_000;

/// Congestion-window growth per adjustment (packets).
const CONGESTION_WINDOW_INCREMENT: u32 = 2;

/// Congestion-window shrink factor.
const CONGESTION_WINDOW_DECREASE: f64 = 0.75;

/// ACK windows that must be sent before a congestion report can trigger pruning.
const PRUNE_GRACE_WINDOWS: u64 = 5;

/// Read-only view published for reporters (beacons, hellos, stats).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RateSnapshot {
    /// Rate used while the window is fully open.
    pub open_window_rate: u64,
    /// Rate for the last transmitted sequence number.
    pub actual_rate: u64,
    /// Measured average rate.
    pub average_rate: u64,
    /// Slow start still in progress.
    pub slow_start: bool,
    /// Open window after the last transmitted packet.
    pub window: u32,
    /// Last sequence number the rate was adjusted for.
    pub last_sequence: SeqNum,
}

/// Rate controller metrics.
#[derive(Clone, Debug, Default)]
pub struct RateControllerMetrics {
    /// Number of rate increases.
    pub increases: u64,
    /// Number of rate decreases.
    pub decreases: u64,
    /// Times the window closed under the sender.
    pub window_closures: u64,
    /// Congestion reports taken into account.
    pub congestion_signals: u64,
    /// Peak rate achieved.
    pub peak_rate: u64,
}

#[derive(Debug)]
struct RateState {
    current_rate: u64,
    increment: u64,
    slow_start: bool,
    out_seq: SeqNum,
    packets_adjusted: u64,
    window_closed: bool,
    window_sum: u64,
    last_window_sum: u64,
    time_to_prune: bool,
    metrics: RateControllerMetrics,
}

/// Rate controller of one node.
///
/// Lock order: the average estimator and the rate state are never held
/// together, and neither is held while calling into the group.
#[derive(Debug)]
pub struct RateController {
    ack_window: u32,
    min_rate: u64,
    max_rate: u64,
    increase_factor: f64,
    max_congestion_window_multiple: u32,
    max_congestion_window: u32,
    is_sender: bool,
    policy: PruningPolicy,
    window: Arc<SendWindow>,
    group: Arc<GroupTree>,
    state: Mutex<RateState>,
    average: Mutex<AverageRate>,
    bytes_transferred: AtomicU64,
    flow_control: FlowControlScore,
    snapshot: ArcSwap<RateSnapshot>,
}

impl RateController {
    /// Controller for `group`, reading the send window the group publishes to.
    ///
    /// The initial rate is the minimum plus two increments.
    pub fn new(profile: &TransportProfile, group: Arc<GroupTree>) -> Result<Self> {
        profile.validate()?;
        let initial = (profile.min_data_rate + 2 * MIN_RATE_INCREMENT).min(profile.max_data_rate);
        let controller = Self {
            ack_window: profile.ack_window,
            min_rate: profile.min_data_rate,
            max_rate: profile.max_data_rate,
            increase_factor: profile.rate_increase_factor,
            max_congestion_window_multiple: profile.max_congestion_window_multiple,
            max_congestion_window: profile.max_congestion_window(),
            is_sender: profile.mode.is_sender(),
            policy: PruningPolicy::from_profile(
                profile.decentralized_pruning,
                profile.pruning_window,
            ),
            window: Arc::clone(group.window()),
            group,
            state: Mutex::new(RateState {
                current_rate: initial,
                increment: MIN_RATE_INCREMENT,
                slow_start: true,
                out_seq: SeqNum::ZERO,
                packets_adjusted: 0,
                window_closed: false,
                window_sum: 0,
                last_window_sum: 0,
                time_to_prune: false,
                metrics: RateControllerMetrics {
                    peak_rate: initial,
                    ..Default::default()
                },
            }),
            average: Mutex::new(AverageRate::new(profile.avg_rate_horizon.as_millis() as u64)),
            bytes_transferred: AtomicU64::new(0),
            flow_control: FlowControlScore::new(),
            snapshot: ArcSwap::from_pointee(RateSnapshot {
                open_window_rate: initial,
                actual_rate: initial,
                slow_start: true,
                ..Default::default()
            }),
        };
        log::debug!(
            "[RateController::new] min {} max {} initial {} B/s, ack window {}",
            controller.min_rate,
            controller.max_rate,
            initial,
            controller.ack_window
        );
        Ok(controller)
    }

    // ========================================================================
    // Rates
    // ========================================================================

    /// Set the open-window rate, clamped to `[1, max_data_rate]`.
    pub fn set_data_rate(&self, rate: u64) {
        let mut state = self.state.lock();
        self.set_rate_locked(&mut state, rate);
    }

    /// Rate used while the window is fully open.
    pub fn open_window_data_rate(&self) -> u64 {
        self.state.lock().current_rate
    }

    /// Rate advertised in congestion reports.
    pub fn preferred_data_rate(&self) -> u64 {
        self.open_window_data_rate()
    }

    /// Rate to transmit `seq` at.
    ///
    /// Full rate while at least an ACK window is open; below that the rate
    /// drops linearly towards the minimum, and to 1 byte/sec once closed.
    pub fn actual_data_rate(&self, seq: SeqNum) -> u64 {
        let current = self.open_window_data_rate();
        self.interpolate(current, self.window.remaining_after(seq))
    }

    fn interpolate(&self, current: u64, window: i64) -> u64 {
        if window >= i64::from(self.ack_window) {
            return current;
        }
        if window < 1 {
            return 1;
        }
        let fraction = window as f64 / f64::from(self.ack_window);
        let rate = self.min_rate as f64 + fraction * (current as f64 - self.min_rate as f64);
        (rate as u64).max(1)
    }

    /// Packets still allowed past the last transmitted one.
    pub fn window(&self) -> u32 {
        let out_seq = self.state.lock().out_seq;
        Self::open_window(self.window.highest_allowed(), out_seq)
    }

    fn open_window(highest: SeqNum, seq: SeqNum) -> u32 {
        u32::try_from(highest.distance_from(seq).max(0)).unwrap_or(u32::MAX)
    }

    /// True while slow start is in progress.
    pub fn is_slow_start(&self) -> bool {
        self.state.lock().slow_start
    }

    /// Get the slow-start rate step.
    pub fn rate_increment(&self) -> u64 {
        self.state.lock().increment
    }

    // ========================================================================
    // Average rate
    // ========================================================================

    /// Count bytes sent (sender) or received (receiver).
    pub fn record_bytes_transferred(&self, bytes: u64) {
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Get the payload bytes recorded so far.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    /// Last computed average rate.
    pub fn average_data_rate(&self) -> u64 {
        self.average.lock().average()
    }

    /// Sample the byte counter and recompute the average rate.
    pub fn calculate_average_data_rate(&self, now_ms: u64) -> u64 {
        let total = self.bytes_transferred();
        let cap = self.is_sender.then_some(self.max_rate);
        let average = self.average.lock().record(now_ms, total, cap);
        log::trace!(
            "[RateController::calculate_average_data_rate] avg {} B/s, total {}",
            average,
            total
        );
        average
    }

    // ========================================================================
    // Per-packet adjustment
    // ========================================================================

    /// Adjust the rate after transmitting `packet`.
    pub fn adjust_rate(&self, packet: &DataPacket) {
        self.adjust_rate_at(packet.seq(), current_time_ms());
    }

    /// Adjust the rate after transmitting `seq` at `now_ms`.
    pub fn adjust_rate_at(&self, seq: SeqNum, now_ms: u64) {
        let boundary = seq.value() % self.ack_window == 0;
        let average = if boundary {
            self.calculate_average_data_rate(now_ms)
        } else {
            self.average_data_rate()
        };
        let highest = self.window.highest_allowed();

        let mut state = self.state.lock();
        state.out_seq = seq;
        state.packets_adjusted += 1;
        state.window_sum += u64::from(Self::open_window(highest, seq));

        if state.slow_start && (seq.follows(highest) || state.current_rate >= self.max_rate) {
            state.slow_start = false;
            log::debug!(
                "[RateController::adjust_rate] slow start over at {} (allowed {}), rate {}",
                seq,
                highest,
                state.current_rate
            );
        }

        if state.slow_start {
            let next = state.current_rate + state.increment;
            self.set_rate_locked(&mut state, next);
            if state.increment < (self.max_rate - self.min_rate) / 4 {
                state.increment += SLOW_START_INCREMENT_STEP;
            }
            log::trace!(
                "[RateController::adjust_rate] slow start seq {} rate {} increment {}",
                seq,
                state.current_rate,
                state.increment
            );
        } else if seq.precedes_or_eq(highest) {
            if state.window_closed {
                state.window_closed = false;
                let old = state.current_rate;
                self.set_rate_locked(&mut state, average);
                state.increment = self.steady_increment(state.current_rate);
                log::debug!(
                    "[RateController::adjust_rate] window reopened ({}), rate {} -> {}, increment {}",
                    Self::open_window(highest, seq) + 1,
                    old,
                    state.current_rate,
                    state.increment
                );
            } else {
                if boundary {
                    let full = u64::from(self.ack_window)
                        * u64::from(self.max_congestion_window_multiple)
                        - 1;
                    let grew = state.window_sum > state.last_window_sum
                        || (state.window_sum == state.last_window_sum && state.window_sum >= full);
                    let target = if grew {
                        average + state.increment
                    } else {
                        average
                    };
                    self.set_rate_locked(&mut state, target);
                    log::debug!(
                        "[RateController::adjust_rate] seq {} window sum {} (last {}), rate {}",
                        seq,
                        state.window_sum,
                        state.last_window_sum,
                        state.current_rate
                    );
                }
                state.increment = self.steady_increment(state.current_rate);
            }
        } else if !state.window_closed {
            state.window_closed = true;
            state.metrics.window_closures += 1;
            log::debug!(
                "[RateController::adjust_rate] window closed at {} (allowed {})",
                seq,
                highest
            );
        }

        if boundary {
            state.last_window_sum = state.window_sum;
            state.window_sum = 0;
        }

        let snapshot = RateSnapshot {
            open_window_rate: state.current_rate,
            actual_rate: self.interpolate(state.current_rate, highest.distance_from(seq)),
            average_rate: average,
            slow_start: state.slow_start,
            window: Self::open_window(highest, seq),
            last_sequence: seq,
        };
        drop(state);
        self.snapshot.store(Arc::new(snapshot));
    }

    fn steady_increment(&self, rate: u64) -> u64 {
        MIN_RATE_INCREMENT.max((rate as f64 * self.increase_factor) as u64)
    }

    fn set_rate_locked(&self, state: &mut RateState, rate: u64) {
        let rate = rate.clamp(1, self.max_rate);
        if rate > state.current_rate {
            state.metrics.increases += 1;
            state.metrics.peak_rate = state.metrics.peak_rate.max(rate);
        } else if rate < state.current_rate {
            state.metrics.decreases += 1;
        }
        state.current_rate = rate;
    }

    // ========================================================================
    // Congestion
    // ========================================================================

    /// Congestion reported by `from` through an ACK.
    ///
    /// Ends slow start. Flags pruning once at least five ACK windows went
    /// out and the average rate is down to the minimum.
    pub fn congestion(&self, from: SocketAddr) {
        let average = self.average_data_rate();
        let mut state = self.state.lock();
        state.slow_start = false;
        state.metrics.congestion_signals += 1;
        state.time_to_prune = state.packets_adjusted
            >= PRUNE_GRACE_WINDOWS * u64::from(self.ack_window)
            && average <= self.min_rate;
        log::debug!(
            "[RateController::congestion] from {} at {}, rate {} avg {}{}",
            from,
            state.out_seq,
            state.current_rate,
            average,
            if state.time_to_prune {
                ", time to prune"
            } else {
                ""
            }
        );
    }

    /// Congestion packet from `from` while the rate is above the reported one.
    ///
    /// Ends slow start and falls back to the measured average if it is lower.
    pub fn adjust_rate_down(&self, from: SocketAddr) {
        let average = self.average_data_rate();
        let mut state = self.state.lock();
        state.slow_start = false;
        state.metrics.congestion_signals += 1;
        let old = state.current_rate;
        if average > 0 && average < old {
            self.set_rate_locked(&mut state, average);
        }
        log::debug!(
            "[RateController::adjust_rate_down] congestion from {}, rate {} -> {}",
            from,
            old,
            state.current_rate
        );
    }

    /// Consume the prune flag raised by [`congestion`](Self::congestion).
    pub fn time_to_prune(&self) -> bool {
        std::mem::take(&mut self.state.lock().time_to_prune)
    }

    /// Grow the congestion window granted to joiners.
    pub fn adjust_congestion_window_up(&self) -> u32 {
        let old = self.window.congestion_window();
        let new = (old + CONGESTION_WINDOW_INCREMENT).min(self.max_congestion_window);
        self.window.set_congestion_window(new);
        if new != old {
            log::debug!(
                "[RateController::adjust_congestion_window_up] {} -> {}",
                old,
                new
            );
        }
        new
    }

    /// Shrink the congestion window, never below one ACK window.
    pub fn adjust_congestion_window_down(&self) -> u32 {
        let old = self.window.congestion_window();
        if old <= self.ack_window {
            return old;
        }
        let new = ((f64::from(old) * CONGESTION_WINDOW_DECREASE) as u32).max(self.ack_window);
        self.window.set_congestion_window(new);
        log::debug!(
            "[RateController::adjust_congestion_window_down] {} -> {}",
            old,
            new
        );
        new
    }

    // ========================================================================
    // Flow control and pruning
    // ========================================================================

    /// Fold one ACK window into this node's own score.
    pub fn set_my_flow_control_info(&self, packets: u32, missing: u32) -> u32 {
        self.flow_control.update(packets, missing)
    }

    /// Get this node own flow-control score.
    pub fn my_flow_control_info(&self) -> u32 {
        self.flow_control.get()
    }

    /// Worst score among this node and its direct members.
    pub fn group_flow_control_info(&self) -> u32 {
        flow_control::group_flow_control_info(self.flow_control.get(), &self.group.members())
    }

    /// Worst score originates below this node.
    pub fn is_subtree_worse(&self) -> bool {
        flow_control::is_subtree_worse(self.flow_control.get(), &self.group.members())
    }

    /// Get the pruning policy from the profile.
    pub fn pruning_policy(&self) -> PruningPolicy {
        self.policy
    }

    /// Direct members to prune given the worst score flagged by the sender.
    pub fn find_members_to_prune(&self, worst: u32) -> Vec<SocketAddr> {
        let candidates = pruning::find_members_to_prune(
            self.policy,
            self.ack_window,
            &self.group.members(),
            self.window.last_known(),
            worst,
        );
        for addr in &candidates {
            log::debug!(
                "[RateController::find_members_to_prune] prune candidate {}",
                addr
            );
        }
        candidates
    }

    // ========================================================================
    // Reporting
    // ========================================================================

    /// Latest published view (lock-free).
    pub fn snapshot(&self) -> Arc<RateSnapshot> {
        self.snapshot.load_full()
    }

    /// Get the rate controller counters.
    pub fn metrics(&self) -> RateControllerMetrics {
        self.state.lock().metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::{Member, Mrole};

    fn controller(profile: TransportProfile, ceiling: u32) -> RateController {
        let window = Arc::new(SendWindow::with_ceiling(SeqNum::new(ceiling)));
        window.set_congestion_window(profile.congestion_window);
        let group = Arc::new(GroupTree::new(
            profile.max_members,
            Mrole::MemberEagerHead,
            window,
        ));
        RateController::new(&profile, group).expect("valid profile")
    }

    fn sender() -> TransportProfile {
        TransportProfile::sender()
    }

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 3, 0, 1], port))
    }

    #[test]
    fn test_initial_rate() {
        let rc = controller(sender(), 100);
        assert_eq!(rc.open_window_data_rate(), 1_000 + 2 * MIN_RATE_INCREMENT);
        assert!(rc.is_slow_start());
        assert_eq!(rc.rate_increment(), MIN_RATE_INCREMENT);
    }

    #[test]
    fn test_set_data_rate_clamps() {
        let rc = controller(sender(), 100);
        rc.set_data_rate(1_000_000);
        assert_eq!(rc.open_window_data_rate(), 64_000);
        rc.set_data_rate(0);
        assert_eq!(rc.open_window_data_rate(), 1);
    }

    #[test]
    fn test_actual_rate_interpolates() {
        let rc = controller(sender(), 100);
        rc.set_data_rate(33_000);
        assert_eq!(rc.actual_data_rate(SeqNum::new(68)), 33_000);
        assert_eq!(rc.actual_data_rate(SeqNum::new(50)), 33_000);
        // half a window open: halfway between min and current
        assert_eq!(rc.actual_data_rate(SeqNum::new(84)), 17_000);
        assert_eq!(rc.actual_data_rate(SeqNum::new(100)), 1);
        assert_eq!(rc.actual_data_rate(SeqNum::new(120)), 1);
    }

    #[test]
    fn test_slow_start_ramp_until_max() {
        let rc = controller(sender(), 100);
        let mut last = rc.open_window_data_rate();
        for seq in 1..=9 {
            rc.adjust_rate_at(SeqNum::new(seq), 0);
            let rate = rc.open_window_data_rate();
            assert!(rate > last, "seq {}: {} <= {}", seq, rate, last);
            last = rate;
        }
        assert_eq!(last, 64_000);
        assert!(rc.is_slow_start());
        rc.adjust_rate_at(SeqNum::new(10), 0);
        assert!(!rc.is_slow_start());
    }

    #[test]
    fn test_slow_start_increment_bounded() {
        // increment stops growing once it reaches (max - min) / 4 = 5000
        let rc = controller(sender().with_rates(1_000, 21_000), 1_000);
        for seq in 1..=3 {
            rc.adjust_rate_at(SeqNum::new(seq), 0);
        }
        assert_eq!(rc.open_window_data_rate(), 16_500);
        assert_eq!(rc.rate_increment(), 5_500);
        rc.adjust_rate_at(SeqNum::new(4), 0);
        assert_eq!(rc.open_window_data_rate(), 21_000);
        assert_eq!(rc.rate_increment(), 5_500);
    }

    #[test]
    fn test_window_close_and_reopen() {
        let rc = controller(sender().with_rates(1_000, 10_000_000), 20);
        for seq in 1..=20 {
            rc.adjust_rate_at(SeqNum::new(seq), 0);
        }
        assert!(rc.is_slow_start());
        let frozen = rc.open_window_data_rate();

        rc.adjust_rate_at(SeqNum::new(21), 0);
        assert!(!rc.is_slow_start());
        assert_eq!(rc.open_window_data_rate(), frozen);
        assert_eq!(rc.metrics().window_closures, 1);

        // reopening resets to the measured average (none yet, clamped to 1)
        rc.window.raise_highest_allowed(SeqNum::new(80));
        rc.adjust_rate_at(SeqNum::new(22), 0);
        assert_eq!(rc.open_window_data_rate(), 1);
        assert_eq!(rc.rate_increment(), MIN_RATE_INCREMENT);
    }

    #[test]
    fn test_steady_state_follows_average() {
        let profile = sender().with_ack_window(4).with_rates(1_000, 1_000_000);
        let rc = controller(profile, 1_000);
        rc.congestion(peer(1));
        assert!(!rc.is_slow_start());

        // first boundary: 4000 bytes over 1s, window grew from nothing
        rc.calculate_average_data_rate(0);
        rc.record_bytes_transferred(4_000);
        for seq in 1..=4 {
            rc.adjust_rate_at(SeqNum::new(seq), 1_000);
        }
        assert_eq!(rc.average_data_rate(), 4_000);
        assert_eq!(rc.open_window_data_rate(), 4_000 + 2_500);

        // ceiling stays: window shrinks, rate holds at the average
        rc.record_bytes_transferred(4_000);
        for seq in 5..=8 {
            rc.adjust_rate_at(SeqNum::new(seq), 2_000);
        }
        assert_eq!(rc.average_data_rate(), 4_000);
        assert_eq!(rc.open_window_data_rate(), 4_000);
    }

    #[test]
    fn test_congestion_flags_prune_after_grace() {
        let rc = controller(sender().with_ack_window(4), 1_000);
        rc.congestion(peer(1));
        assert!(!rc.time_to_prune());

        for seq in 1..=20 {
            rc.adjust_rate_at(SeqNum::new(seq), 0);
        }
        // average rate still 0 <= min
        rc.congestion(peer(1));
        assert!(rc.time_to_prune());
        assert!(!rc.time_to_prune());
        assert_eq!(rc.metrics().congestion_signals, 2);
    }

    #[test]
    fn test_adjust_rate_down() {
        let rc = controller(sender(), 1_000);
        rc.set_data_rate(50_000);
        rc.adjust_rate_down(peer(1));
        assert!(!rc.is_slow_start());
        // no average yet, rate kept
        assert_eq!(rc.open_window_data_rate(), 50_000);

        rc.calculate_average_data_rate(0);
        rc.record_bytes_transferred(20_000);
        rc.calculate_average_data_rate(1_000);
        rc.adjust_rate_down(peer(1));
        assert_eq!(rc.open_window_data_rate(), 20_000);
    }

    #[test]
    fn test_congestion_window_bounds() {
        let rc = controller(sender(), 100);
        assert_eq!(rc.adjust_congestion_window_up(), 66);
        for _ in 0..100 {
            rc.adjust_congestion_window_up();
        }
        assert_eq!(rc.window.congestion_window(), 160);

        assert_eq!(rc.adjust_congestion_window_down(), 120);
        for _ in 0..10 {
            rc.adjust_congestion_window_down();
        }
        assert_eq!(rc.window.congestion_window(), 32);
    }

    #[test]
    fn test_group_flow_control() {
        let rc = controller(sender(), 100);
        assert!(!rc.is_subtree_worse());
        rc.set_my_flow_control_info(10, 4); // 10
        rc.group
            .add_member(Member::new(peer(1)))
            .expect("join");
        rc.group
            .with_member_mut(peer(1), |m| m.set_flow_control_info(30, false))
            .expect("member present");
        assert_eq!(rc.my_flow_control_info(), 10);
        assert_eq!(rc.group_flow_control_info(), 30);
        assert!(rc.is_subtree_worse());
        assert_eq!(rc.find_members_to_prune(30), vec![peer(1)]);
    }

    #[test]
    fn test_snapshot_published() {
        let rc = controller(sender(), 100);
        rc.adjust_rate_at(SeqNum::new(1), 0);
        let snap = rc.snapshot();
        assert_eq!(snap.last_sequence, SeqNum::new(1));
        assert_eq!(snap.window, 99);
        assert_eq!(snap.open_window_rate, rc.open_window_data_rate());
        assert!(snap.slow_start);
    }

    #[test]
    fn test_invalid_profile_rejected() {
        let window = Arc::new(SendWindow::new(64));
        let group = Arc::new(GroupTree::new(4, Mrole::MemberOnly, window));
        let profile = sender().with_rates(10, 5);
        assert!(RateController::new(&profile, group).is_err());
    }
}
