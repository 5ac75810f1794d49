// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-member bookkeeping and tree-role enums.

use std::net::SocketAddr;

use super::mask::MemberId;
use crate::seq::SeqNum;

/// Role a node is willing to play in the repair tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mrole {
    /// Receiver only, never becomes a head.
    MemberOnly,
    /// Volunteers as head as soon as possible.
    MemberEagerHead,
    /// Becomes a head only when nobody else will.
    #[default]
    MemberReluctantHead,
}

impl Mrole {
    /// Role allows acting as a repair head.
    pub fn can_be_head(self) -> bool {
        self != Mrole::MemberOnly
    }
}

/// Head state advertised in hello/beacon traffic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Hstate {
    #[default]
    Init,
    AcceptingMembers,
    AcceptingPotentialHeadsOnly,
    NotAcceptingMembers,
    Resigning,
}

impl Hstate {
    /// Head is currently open to some kind of joiner.
    pub fn is_accepting(self) -> bool {
        matches!(
            self,
            Hstate::AcceptingMembers | Hstate::AcceptingPotentialHeadsOnly
        )
    }
}

/// Congestion state of this node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Cstate {
    #[default]
    Normal,
    Congested,
}

/// LAN tree-formation state (carried through, not interpreted here).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Lstate {
    #[default]
    Na,
    Volunteering,
    LanHead,
    LanMember,
}

/// One directly attached member, as seen by its head.
///
/// Owned by [`GroupTree`](super::GroupTree); read through snapshots or
/// mutated through `GroupTree::with_member_mut`.
#[derive(Clone, Debug)]
pub struct Member {
    addr: SocketAddr,
    id: Option<MemberId>,
    mrole: Mrole,
    hstate: Hstate,
    last_packet_acked: SeqNum,
    highest_sequence_allowed: SeqNum,
    flow_control_info: u32,
    subtree_flow_control_info: bool,
    direct_members: u16,
    indirect_members: u16,
    advertising_members: u16,
    ttl: u8,
    rtt_ms: u32,
    missed_acks: u32,
    last_heard_ms: u64,
    demand_ack: bool,
}

impl Member {
    /// New member keyed by its unicast address and port.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            id: None,
            mrole: Mrole::MemberOnly,
            hstate: Hstate::Init,
            last_packet_acked: SeqNum::ZERO,
            highest_sequence_allowed: SeqNum::ZERO,
            flow_control_info: 0,
            subtree_flow_control_info: true,
            direct_members: 0,
            indirect_members: 0,
            advertising_members: 0,
            ttl: 0,
            rtt_ms: 0,
            missed_acks: 0,
            last_heard_ms: 0,
            demand_ack: false,
        }
    }

    /// Builder: last packet the member had acknowledged when joining.
    pub fn with_last_packet_acked(mut self, seq: SeqNum) -> Self {
        self.last_packet_acked = seq;
        self
    }

    /// Builder: tree role.
    pub fn with_mrole(mut self, mrole: Mrole) -> Self {
        self.mrole = mrole;
        self
    }

    /// Builder: head state.
    pub fn with_hstate(mut self, hstate: Hstate) -> Self {
        self.hstate = hstate;
        self
    }

    /// Builder: descendant counts reported by the member.
    pub fn with_counts(mut self, direct: u16, indirect: u16, advertising: u16) -> Self {
        self.direct_members = direct;
        self.indirect_members = indirect;
        self.advertising_members = advertising;
        self
    }

    /// Builder: TTL distance to the member.
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Get the member address and port.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Mask id, assigned on join.
    pub fn id(&self) -> Option<MemberId> {
        self.id
    }

    /// Bind the mask id handed out on join.
    pub(crate) fn set_id(&mut self, id: MemberId) {
        self.id = Some(id);
    }

    /// Get the role the member advertised.
    pub fn mrole(&self) -> Mrole {
        self.mrole
    }

    /// Set the advertised role.
    pub fn set_mrole(&mut self, mrole: Mrole) {
        self.mrole = mrole;
    }

    /// Get the member head state.
    pub fn hstate(&self) -> Hstate {
        self.hstate
    }

    /// Set the member head state.
    pub fn set_hstate(&mut self, hstate: Hstate) {
        self.hstate = hstate;
    }

    /// Get the last sequence number the member acknowledged.
    pub fn last_packet_acked(&self) -> SeqNum {
        self.last_packet_acked
    }

    /// Advance last-acked; older values are ignored. Returns true if moved.
    pub fn advance_last_packet_acked(&mut self, seq: SeqNum) -> bool {
        if seq.follows(self.last_packet_acked) {
            self.last_packet_acked = seq;
            true
        } else {
            false
        }
    }

    /// Get the member ceiling.
    pub fn highest_sequence_allowed(&self) -> SeqNum {
        self.highest_sequence_allowed
    }

    /// Raise the member ceiling. The ceiling never moves backwards.
    pub fn raise_highest_sequence_allowed(&mut self, seq: SeqNum) -> bool {
        if seq.follows(self.highest_sequence_allowed) {
            self.highest_sequence_allowed = seq;
            true
        } else {
            false
        }
    }

    /// Set the initial ceiling at join, before any ACK.
    pub(crate) fn seed_highest_sequence_allowed(&mut self, seq: SeqNum) {
        self.highest_sequence_allowed = seq;
    }

    /// Flow-control score (0-100, higher is worse).
    pub fn flow_control_info(&self) -> u32 {
        self.flow_control_info
    }

    /// Score reported on behalf of the member's subtree rather than itself.
    pub fn is_subtree_flow_control_info(&self) -> bool {
        self.subtree_flow_control_info
    }

    /// Record a flow-control score and where it came from.
    pub fn set_flow_control_info(&mut self, score: u32, from_subtree: bool) {
        self.flow_control_info = score;
        self.subtree_flow_control_info = from_subtree;
    }

    /// Get the direct member count the member reported.
    pub fn direct_members(&self) -> u16 {
        self.direct_members
    }

    /// Get the indirect member count the member reported.
    pub fn indirect_members(&self) -> u16 {
        self.indirect_members
    }

    /// Get the advertising head count the member reported.
    pub fn advertising_members(&self) -> u16 {
        self.advertising_members
    }

    /// Replace the reported descendant counts.
    pub fn set_counts(&mut self, direct: u16, indirect: u16, advertising: u16) {
        self.direct_members = direct;
        self.indirect_members = indirect;
        self.advertising_members = advertising;
    }

    /// Member counts as an advertising head for hello accounting.
    pub fn is_advertising(&self) -> bool {
        self.hstate.is_accepting() || self.mrole.can_be_head()
    }

    /// Get the TTL distance to the member.
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    /// Set the TTL distance to the member.
    pub fn set_ttl(&mut self, ttl: u8) {
        self.ttl = ttl;
    }

    /// Get the round-trip time estimate (ms).
    pub fn rtt_ms(&self) -> u32 {
        self.rtt_ms
    }

    /// Set the round-trip time estimate (ms).
    pub fn set_rtt_ms(&mut self, rtt_ms: u32) {
        self.rtt_ms = rtt_ms;
    }

    /// Get the ACK intervals missed since the member was last heard.
    pub fn missed_acks(&self) -> u32 {
        self.missed_acks
    }

    /// Count one more missed ACK interval; returns the new total.
    pub fn increment_missed_acks(&mut self) -> u32 {
        self.missed_acks = self.missed_acks.saturating_add(1);
        self.missed_acks
    }

    /// Get the time (ms) of the last traffic from the member.
    pub fn last_heard_ms(&self) -> u64 {
        self.last_heard_ms
    }

    /// Record traffic from the member; resets the missed-ACK counter.
    pub fn heard_from(&mut self, now_ms: u64) {
        self.last_heard_ms = now_ms;
        self.missed_acks = 0;
    }

    /// True when the member must ACK immediately.
    pub fn demand_ack(&self) -> bool {
        self.demand_ack
    }

    /// Set or clear the immediate-ACK demand.
    pub fn set_demand_ack(&mut self, demand: bool) {
        self.demand_ack = demand;
    }
}

/// The head this node is affiliated with when acting as a member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeadInfo {
    /// Head address.
    pub addr: SocketAddr,
    /// TTL distance to the head.
    pub ttl: u8,
    /// Last head state the head advertised.
    pub hstate: Hstate,
}

impl HeadInfo {
    /// Head accepting members at `addr`.
    pub fn new(addr: SocketAddr, ttl: u8) -> Self {
        Self {
            addr,
            ttl,
            hstate: Hstate::AcceptingMembers,
        }
    }
}
