// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Prune-candidate selection.
//!
//! Only identifies members; removal is up to the membership layer. Members
//! whose score was reported on behalf of their subtree are never candidates,
//! the problem lies further down.

use std::net::SocketAddr;

use super::flow_control::is_bad_enough;
use crate::membership::Member;
use crate::seq::SeqNum;

/// How prune candidates are chosen.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PruningPolicy {
    /// Each head drops members lagging more than `pruning_window` ACK
    /// windows behind the highest known sequence.
    Decentralized { pruning_window: f64 },
    /// The sender flags the worst score and heads drop members close to it.
    Centralized,
}

impl PruningPolicy {
    /// Policy for the profile pruning settings.
    pub fn from_profile(decentralized: bool, pruning_window: f64) -> Self {
        if decentralized {
            PruningPolicy::Decentralized { pruning_window }
        } else {
            PruningPolicy::Centralized
        }
    }

    /// True when heads prune on their own.
    pub fn is_decentralized(&self) -> bool {
        matches!(self, PruningPolicy::Decentralized { .. })
    }
}

/// Members to prune under `policy`.
///
/// `last_known` is the highest sequence this node knows of, `worst` the
/// worst flow-control score flagged by the sender.
pub fn find_members_to_prune(
    policy: PruningPolicy,
    ack_window: u32,
    members: &[Member],
    last_known: SeqNum,
    worst: u32,
) -> Vec<SocketAddr> {
    match policy {
        PruningPolicy::Decentralized { pruning_window } => {
            let allowed_lag = (pruning_window * f64::from(ack_window)) as u32;
            let low_allowed = last_known.subtract(allowed_lag);
            let lowest = members
                .iter()
                .map(Member::last_packet_acked)
                .reduce(SeqNum::earliest);
            match lowest {
                Some(lowest) if lowest.precedes(low_allowed) => {}
                _ => return Vec::new(),
            }
            log::debug!(
                "[find_members_to_prune] decentralized: last known {}, floor {}",
                last_known,
                low_allowed
            );
            members
                .iter()
                .filter(|m| !m.is_subtree_flow_control_info())
                .filter(|m| m.last_packet_acked().precedes(low_allowed))
                .map(Member::addr)
                .collect()
        }
        PruningPolicy::Centralized => {
            log::debug!(
                "[find_members_to_prune] centralized: worst flow control info {}",
                worst
            );
            members
                .iter()
                .filter(|m| !m.is_subtree_flow_control_info())
                .filter(|m| is_bad_enough(m.flow_control_info(), worst))
                .map(Member::addr)
                .collect()
        }
    }
}
