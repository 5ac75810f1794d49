// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Flow-control scores.
//!
//! A score is the smoothed percentage of packets a node had to request
//! again (0-100, higher is worse). Heads report the worst score of their
//! subtree upward so the sender can tell which part of the tree struggles.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::membership::Member;

/// Highest possible score.
pub const MAX_SCORE: u32 = 100;

/// Weight of the previous score in the moving average.
const HISTORY_WEIGHT: f64 = 0.75;

/// Slack allowed when comparing a member against the worst score.
const BAD_ENOUGH_FACTOR: f64 = 1.05;

/// `a` is strictly worse than `b`.
#[inline]
pub fn is_worse(a: u32, b: u32) -> bool {
    a > b
}

/// `a` is within 5% of `b` (or worse).
#[inline]
pub fn is_bad_enough(a: u32, b: u32) -> bool {
    BAD_ENOUGH_FACTOR * f64::from(a) >= f64::from(b)
}

/// Worst score among this node and its direct members.
pub fn group_flow_control_info(own: u32, members: &[Member]) -> u32 {
    members
        .iter()
        .map(Member::flow_control_info)
        .fold(own, |worst, score| if is_worse(score, worst) { score } else { worst })
}

/// Some member reports a score at least as bad as this node's own.
pub fn is_subtree_worse(own: u32, members: &[Member]) -> bool {
    !members.is_empty() && !is_worse(own, group_flow_control_info(own, members))
}

/// This node's own smoothed score.
#[derive(Debug, Default)]
pub struct FlowControlScore {
    score: AtomicU32,
}

impl FlowControlScore {
    /// Score starting at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current score.
    pub fn get(&self) -> u32 {
        self.score.load(Ordering::Relaxed)
    }

    /// Fold in one ACK window: `missing` of `packets` had to be requested.
    ///
    /// Returns the new smoothed score.
    pub fn update(&self, packets: u32, missing: u32) -> u32 {
        let sample = if packets == 0 || missing == 0 {
            0
        } else {
            (u64::from(missing) * 100 / u64::from(packets)).min(u64::from(MAX_SCORE)) as u32
        };
        let previous = self.get();
        let smoothed = (HISTORY_WEIGHT * f64::from(previous)
            + (1.0 - HISTORY_WEIGHT) * f64::from(sample)) as u32;
        self.score.store(smoothed, Ordering::Relaxed);
        if smoothed != previous {
            log::trace!(
                "[FlowControlScore::update] {}/{} missing, score {} -> {}",
                missing,
                packets,
                previous,
                smoothed
            );
        }
        smoothed
    }
}
