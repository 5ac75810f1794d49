// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Group bookkeeping of one tree node.
//!
//! As a head (or the sender) the node tracks its directly attached members
//! and derives from them how far the stream may advance. As a member it
//! records the head it is affiliated with.
//!
//! # Locking
//!
//! The member list is guarded by one mutex. The membership mask has its own
//! lock and is only taken nested inside the member lock. The retransmission
//! history is purged after the member lock has been released.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::mask::{MaskSnapshot, MemberId, MembershipMask};
use super::member::{Cstate, HeadInfo, Hstate, Lstate, Member, Mrole};
use crate::cache::DataCache;
use crate::error::{Error, Result};
use crate::seq::SeqNum;
use crate::window::SendWindow;

/// Group ceiling before and after a member ceiling moved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CeilingChange {
    /// Group ceiling before the change.
    pub old_group: SeqNum,
    /// Group ceiling after the change.
    pub new_group: SeqNum,
}

impl CeilingChange {
    /// Packets the group ceiling advanced by (0 if it did not move forward).
    pub fn advanced_by(&self) -> u32 {
        u32::try_from(self.new_group.distance_from(self.old_group)).unwrap_or(0)
    }
}

/// Node-level tree states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeStates {
    /// Head state.
    pub hstate: Hstate,
    /// Control state.
    pub cstate: Cstate,
    /// Local state.
    pub lstate: Lstate,
    /// Tree level: 0 unknown, 1 sender, 2+ members.
    pub rx_level: u8,
    /// TTL used for repairs sent to members.
    pub retransmit_ttl: u8,
}

/// Per-node member list, ceilings and tree state.
#[derive(Debug)]
pub struct GroupTree {
    members: Mutex<Vec<Member>>,
    mask: MembershipMask,
    window: Arc<SendWindow>,
    data_cache: Option<Arc<DataCache>>,
    mrole: Mrole,
    peak_members: AtomicUsize,
    states: Mutex<NodeStates>,
    head: Mutex<Option<HeadInfo>>,
    data_end: Mutex<bool>,
    task_done: Condvar,
}

impl GroupTree {
    /// Group accepting up to `max_members` direct members.
    pub fn new(max_members: usize, mrole: Mrole, window: Arc<SendWindow>) -> Self {
        Self {
            members: Mutex::new(Vec::with_capacity(max_members)),
            mask: MembershipMask::new(max_members),
            window,
            data_cache: None,
            mrole,
            peak_members: AtomicUsize::new(0),
            states: Mutex::new(NodeStates::default()),
            head: Mutex::new(None),
            data_end: Mutex::new(false),
            task_done: Condvar::new(),
        }
    }

    /// Attach the retransmission history purged when members leave.
    pub fn with_data_cache(mut self, cache: Arc<DataCache>) -> Self {
        self.data_cache = Some(cache);
        self
    }

    /// Get the send window shared with the rate controller.
    pub fn window(&self) -> &Arc<SendWindow> {
        &self.window
    }

    /// Retransmission history, if attached.
    pub fn data_cache(&self) -> Option<&Arc<DataCache>> {
        self.data_cache.as_ref()
    }

    /// Get this node role.
    pub fn mrole(&self) -> Mrole {
        self.mrole
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Attach a member and return its id.
    ///
    /// The member ceiling starts at `last_acked + congestion_window`, never
    /// below the current group ceiling, so a late joiner cannot pull the
    /// group back.
    pub fn add_member(&self, mut member: Member) -> Result<MemberId> {
        let mut members = self.members.lock();
        if members.iter().any(|m| m.addr() == member.addr()) {
            return Err(Error::DuplicateMember(member.addr()));
        }
        let Some(id) = self.mask.assign_new_member_bit() else {
            log::warn!(
                "[GroupTree::add_member] rejecting {}: no member id left ({} members)",
                member.addr(),
                members.len()
            );
            return Err(Error::MembershipFull);
        };

        let group = self.compute_highest_allowed(&members);
        let candidate = member
            .last_packet_acked()
            .add(self.window.congestion_window());
        let ceiling = candidate.latest(group);

        member.set_id(id);
        member.seed_highest_sequence_allowed(ceiling);
        log::info!(
            "[GroupTree::add_member] member {} joined as id {} (last acked {}, ceiling {})",
            member.addr(),
            id,
            member.last_packet_acked(),
            ceiling
        );
        members.push(member);
        self.peak_members.fetch_max(members.len(), Ordering::Relaxed);
        self.publish(&members);
        Ok(id)
    }

    /// Detach a member, release its id and purge the history it pinned.
    pub fn remove_member(&self, addr: SocketAddr) -> Option<Member> {
        let removed = {
            let mut members = self.members.lock();
            let index = members.iter().position(|m| m.addr() == addr)?;
            let removed = members.remove(index);
            if let Some(id) = removed.id() {
                self.mask.clear_member_bit(id);
            }
            self.publish(&members);
            log::info!(
                "[GroupTree::remove_member] member {} left ({} remaining)",
                addr,
                members.len()
            );
            removed
        };

        self.purge_data_cache(None);
        let _data_end = self.data_end.lock();
        self.task_done.notify_all();
        Some(removed)
    }

    /// Purge the retransmission history down to `keep` packets (default:
    /// its low-water mark). Returns the remaining size, or `None` without a
    /// history attached.
    pub fn purge_data_cache(&self, keep: Option<usize>) -> Option<usize> {
        let cache = self.data_cache.as_ref()?;
        let stop = {
            let members = self.members.lock();
            match Self::compute_lowest_acked(&members) {
                Some(lowest) => lowest.increment(),
                None => self.window.last_known().increment(),
            }
        };
        Some(cache.purge(stop, keep.unwrap_or_else(|| cache.low_water_mark())))
    }

    /// Copy of the member at `addr`, if attached.
    pub fn lookup_by_address(&self, addr: SocketAddr) -> Option<Member> {
        self.members
            .lock()
            .iter()
            .find(|m| m.addr() == addr)
            .cloned()
    }

    /// Member at position `index` in join order.
    pub fn lookup_by_index(&self, index: usize) -> Option<Member> {
        self.members.lock().get(index).cloned()
    }

    /// True when a member at `addr` is attached.
    pub fn contains(&self, addr: SocketAddr) -> bool {
        self.members.lock().iter().any(|m| m.addr() == addr)
    }

    /// Copy of the member list in join order.
    pub fn members(&self) -> Vec<Member> {
        self.members.lock().clone()
    }

    /// Run `f` on a member under the group lock.
    ///
    /// `f` must not call back into the group or any other component.
    pub fn with_member_mut<R>(
        &self,
        addr: SocketAddr,
        f: impl FnOnce(&mut Member) -> R,
    ) -> Option<R> {
        let mut members = self.members.lock();
        members.iter_mut().find(|m| m.addr() == addr).map(f)
    }

    /// Raise a member ceiling and recompute the group ceiling.
    pub fn set_member_ceiling(
        &self,
        addr: SocketAddr,
        ceiling: SeqNum,
    ) -> Option<CeilingChange> {
        let mut members = self.members.lock();
        let old_group = self.compute_highest_allowed(&members);
        members
            .iter_mut()
            .find(|m| m.addr() == addr)?
            .raise_highest_sequence_allowed(ceiling);
        let new_group = self.compute_highest_allowed(&members);
        self.publish(&members);
        Some(CeilingChange {
            old_group,
            new_group,
        })
    }

    /// Copy of the membership mask.
    pub fn mask_snapshot(&self) -> MaskSnapshot {
        self.mask.snapshot()
    }

    // ========================================================================
    // Derived values
    // ========================================================================

    /// Lowest member ceiling, or the node's own ceiling without members.
    pub fn highest_sequence_allowed(&self) -> SeqNum {
        self.compute_highest_allowed(&self.members.lock())
    }

    /// Lowest last-acked sequence across members.
    pub fn lowest_packet_acked(&self) -> Option<SeqNum> {
        Self::compute_lowest_acked(&self.members.lock())
    }

    fn compute_highest_allowed(&self, members: &[Member]) -> SeqNum {
        members
            .iter()
            .map(Member::highest_sequence_allowed)
            .reduce(SeqNum::earliest)
            .unwrap_or_else(|| self.window.highest_allowed())
    }

    fn compute_lowest_acked(members: &[Member]) -> Option<SeqNum> {
        members
            .iter()
            .map(Member::last_packet_acked)
            .reduce(SeqNum::earliest)
    }

    fn publish(&self, members: &[Member]) {
        if !members.is_empty() {
            self.window
                .raise_highest_allowed(self.compute_highest_allowed(members));
        }
    }

    // ========================================================================
    // Counters
    // ========================================================================

    /// Number of attached members.
    pub fn direct_member_count(&self) -> usize {
        self.members.lock().len()
    }

    /// Descendants reported by members (their direct plus indirect counts).
    pub fn indirect_member_count(&self) -> usize {
        self.members
            .lock()
            .iter()
            .map(|m| usize::from(m.direct_members()) + usize::from(m.indirect_members()))
            .sum()
    }

    /// Direct members that will never become heads.
    pub fn member_only_count(&self) -> usize {
        self.members
            .lock()
            .iter()
            .filter(|m| m.mrole() == Mrole::MemberOnly)
            .count()
    }

    /// Direct members advertising themselves as heads.
    pub fn direct_advertising_count(&self) -> usize {
        self.members
            .lock()
            .iter()
            .filter(|m| m.is_advertising())
            .count()
    }

    /// Advertising heads below the direct members.
    pub fn indirect_advertising_count(&self) -> usize {
        self.members
            .lock()
            .iter()
            .map(|m| usize::from(m.advertising_members()))
            .sum()
    }

    /// Largest member count ever observed.
    pub fn peak_member_count(&self) -> usize {
        self.peak_members.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Node state
    // ========================================================================

    /// Get the node tree states.
    pub fn states(&self) -> NodeStates {
        *self.states.lock()
    }

    /// Set the head state; changes are logged.
    pub fn set_hstate(&self, hstate: Hstate) {
        let mut states = self.states.lock();
        if states.hstate != hstate {
            log::debug!(
                "[GroupTree::set_hstate] {:?} -> {:?}",
                states.hstate,
                hstate
            );
            states.hstate = hstate;
        }
    }

    /// Set the control state.
    pub fn set_cstate(&self, cstate: Cstate) {
        self.states.lock().cstate = cstate;
    }

    /// Set the local state.
    pub fn set_lstate(&self, lstate: Lstate) {
        self.states.lock().lstate = lstate;
    }

    /// Set the tree level.
    pub fn set_rx_level(&self, level: u8) {
        self.states.lock().rx_level = level;
    }

    /// Set the TTL used for repairs.
    pub fn set_retransmit_ttl(&self, ttl: u8) {
        self.states.lock().retransmit_ttl = ttl;
    }

    /// Head this node is affiliated with as a member.
    pub fn head(&self) -> Option<HeadInfo> {
        self.head.lock().clone()
    }

    /// Affiliate with `head`, or detach with `None`.
    pub fn set_head(&self, head: Option<HeadInfo>) {
        let mut current = self.head.lock();
        log::info!(
            "[GroupTree::set_head] {:?} -> {:?}",
            current.as_ref().map(|h| h.addr),
            head.as_ref().map(|h| h.addr)
        );
        *current = head;
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// Record that the sender signalled end of data.
    pub fn set_data_end(&self) {
        let mut data_end = self.data_end.lock();
        *data_end = true;
        self.task_done.notify_all();
    }

    /// True once the sender signalled end of data.
    pub fn is_data_end(&self) -> bool {
        *self.data_end.lock()
    }

    /// All members have left and the stream has ended.
    pub fn is_head_task_done(&self) -> bool {
        self.is_data_end() && self.direct_member_count() == 0
    }

    /// Block until the head task is done. Returns false on timeout.
    pub fn wait_head_task_done(&self, timeout: Duration) -> bool {
        let mut data_end = self.data_end.lock();
        let result = self.task_done.wait_while_for(
            &mut data_end,
            |ended| !(*ended && self.direct_member_count() == 0),
            timeout,
        );
        !result.timed_out() || (*data_end && self.direct_member_count() == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    fn group(capacity: usize, congestion_window: u32) -> GroupTree {
        GroupTree::new(
            capacity,
            Mrole::MemberEagerHead,
            Arc::new(SendWindow::new(congestion_window)),
        )
    }

    fn join(g: &GroupTree, port: u16, last_acked: u32) -> MemberId {
        g.add_member(Member::new(addr(port)).with_last_packet_acked(SeqNum::new(last_acked)))
            .expect("join accepted")
    }

    #[test]
    fn test_first_member_ceiling() {
        let g = group(4, 64);
        join(&g, 1, 10);
        assert_eq!(g.highest_sequence_allowed(), SeqNum::new(74));
        assert_eq!(g.window().highest_allowed(), SeqNum::new(74));
        assert_eq!(g.lowest_packet_acked(), Some(SeqNum::new(10)));
    }

    #[test]
    fn test_group_ceiling_is_min_of_members() {
        let g = group(4, 64);
        join(&g, 1, 10);
        join(&g, 2, 30);
        assert!(g.set_member_ceiling(addr(2), SeqNum::new(200)).is_some());
        assert_eq!(g.highest_sequence_allowed(), SeqNum::new(74));
        let change = g
            .set_member_ceiling(addr(1), SeqNum::new(150))
            .expect("member present");
        assert_eq!(change.old_group, SeqNum::new(74));
        assert_eq!(change.new_group, SeqNum::new(150));
        assert_eq!(change.advanced_by(), 76);
    }

    #[test]
    fn test_member_ceiling_never_decreases() {
        let g = group(4, 64);
        join(&g, 1, 10);
        let change = g
            .set_member_ceiling(addr(1), SeqNum::new(20))
            .expect("member present");
        assert_eq!(change.new_group, SeqNum::new(74));
    }

    #[test]
    fn test_duplicate_and_full() {
        let g = group(2, 64);
        join(&g, 1, 0);
        assert_eq!(
            g.add_member(Member::new(addr(1))),
            Err(Error::DuplicateMember(addr(1)))
        );
        join(&g, 2, 0);
        assert_eq!(
            g.add_member(Member::new(addr(3))),
            Err(Error::MembershipFull)
        );
    }

    #[test]
    fn test_remove_releases_id_and_tracks_peak() {
        let g = group(4, 64);
        join(&g, 1, 0);
        let second = join(&g, 2, 0);
        join(&g, 3, 0);
        assert_eq!(g.peak_member_count(), 3);

        let removed = g.remove_member(addr(2)).expect("present");
        assert_eq!(removed.id(), Some(second));
        assert!(!g.mask_snapshot().contains(second));
        assert_eq!(g.direct_member_count(), 2);
        assert_eq!(g.peak_member_count(), 3);
        assert_eq!(join(&g, 4, 0), second);
        assert!(g.remove_member(addr(9)).is_none());
    }

    #[test]
    fn test_lookup() {
        let g = group(4, 64);
        join(&g, 1, 0);
        join(&g, 2, 0);
        assert_eq!(g.lookup_by_index(1).expect("index 1").addr(), addr(2));
        assert!(g.lookup_by_index(2).is_none());
        assert!(g.lookup_by_address(addr(1)).is_some());
        assert!(g.lookup_by_address(addr(7)).is_none());
    }

    #[test]
    fn test_counts() {
        let g = group(8, 64);
        g.add_member(Member::new(addr(1)).with_counts(2, 3, 1))
            .expect("join");
        g.add_member(
            Member::new(addr(2))
                .with_mrole(Mrole::MemberReluctantHead)
                .with_counts(1, 0, 0),
        )
        .expect("join");
        g.add_member(Member::new(addr(3)).with_hstate(Hstate::AcceptingMembers))
            .expect("join");

        assert_eq!(g.direct_member_count(), 3);
        assert_eq!(g.indirect_member_count(), 6);
        assert_eq!(g.member_only_count(), 2);
        assert_eq!(g.direct_advertising_count(), 2);
        assert_eq!(g.indirect_advertising_count(), 1);
    }

    #[test]
    fn test_remove_purges_history() {
        use crate::cache::DataPacket;

        let cache = Arc::new(DataCache::new(30, 4));
        let g = group(4, 64).with_data_cache(Arc::clone(&cache));
        for seq in 1..=20 {
            cache.insert(Arc::new(DataPacket::new(SeqNum::new(seq), vec![])), true);
        }
        join(&g, 1, 15);
        join(&g, 2, 5);
        g.window().advance_last_known(SeqNum::new(20));

        // member 2 pins the history at packet 6
        assert_eq!(g.purge_data_cache(Some(0)), Some(15));
        assert_eq!(cache.lowest_sequence(), Some(SeqNum::new(6)));

        // leaving purges down to the low-water mark
        g.remove_member(addr(2));
        assert_eq!(cache.len(), cache.low_water_mark());
        assert_eq!(cache.lowest_sequence(), Some(SeqNum::new(11)));
    }

    #[test]
    fn test_head_task_done() {
        let g = Arc::new(group(4, 64));
        join(&g, 1, 0);
        assert!(!g.is_head_task_done());
        g.set_data_end();
        assert!(!g.is_head_task_done());
        assert!(!g.wait_head_task_done(Duration::from_millis(5)));

        let waiter = {
            let g = Arc::clone(&g);
            std::thread::spawn(move || g.wait_head_task_done(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        g.remove_member(addr(1));
        assert!(waiter.join().expect("waiter panicked"));
        assert!(g.is_head_task_done());
    }

    #[test]
    fn test_states_and_head() {
        let g = group(4, 64);
        g.set_hstate(Hstate::AcceptingMembers);
        g.set_cstate(Cstate::Congested);
        g.set_rx_level(2);
        let states = g.states();
        assert_eq!(states.hstate, Hstate::AcceptingMembers);
        assert_eq!(states.cstate, Cstate::Congested);
        assert_eq!(states.rx_level, 2);

        assert!(g.head().is_none());
        g.set_head(Some(HeadInfo::new(addr(50), 3)));
        assert_eq!(g.head().expect("head").ttl, 3);
    }
}
