// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node-level send window.
//!
//! Sequence numbers shared between the membership bookkeeping (which
//! publishes the ceiling) and the rate controller / output path (which read
//! it), plus the congestion window granted to joining members. Kept in
//! atomics so readers never take the group lock.
//!
//! ```text
//!   last_known            highest_allowed
//!       |<------ window ------>|
//!   ----+----------------------+------> seq
//! ```

use std::sync::atomic::{AtomicU32, Ordering};

use crate::seq::SeqNum;

/// Shared send window of one node.
#[derive(Debug, Default)]
pub struct SendWindow {
    highest_allowed: AtomicU32,
    last_known: AtomicU32,
    congestion_window: AtomicU32,
}

impl SendWindow {
    /// Empty window granting `congestion_window` packets to joiners.
    pub fn new(congestion_window: u32) -> Self {
        Self {
            highest_allowed: AtomicU32::new(0),
            last_known: AtomicU32::new(0),
            congestion_window: AtomicU32::new(congestion_window),
        }
    }

    /// Window seeded with an initial ceiling.
    pub fn with_ceiling(ceiling: SeqNum) -> Self {
        let window = Self::default();
        window.highest_allowed.store(ceiling.value(), Ordering::Release);
        window
    }

    /// Packets a member may run ahead of its last ACK.
    pub fn congestion_window(&self) -> u32 {
        self.congestion_window.load(Ordering::Acquire)
    }

    /// Set the packets a member may run ahead of its last ACK.
    pub fn set_congestion_window(&self, packets: u32) {
        self.congestion_window.store(packets, Ordering::Release);
    }

    /// Highest sequence this node may transmit (or let its subtree reach).
    pub fn highest_allowed(&self) -> SeqNum {
        SeqNum::new(self.highest_allowed.load(Ordering::Acquire))
    }

    /// Publish a new ceiling. Values older than the current one are ignored.
    pub fn raise_highest_allowed(&self, ceiling: SeqNum) -> bool {
        self.raise(&self.highest_allowed, ceiling)
    }

    /// Highest sequence this node has produced or received in order.
    pub fn last_known(&self) -> SeqNum {
        SeqNum::new(self.last_known.load(Ordering::Acquire))
    }

    /// Record progress of the stream. Older values are ignored.
    pub fn advance_last_known(&self, seq: SeqNum) -> bool {
        self.raise(&self.last_known, seq)
    }

    /// Packets still allowed past `seq` (negative once the window closed).
    pub fn remaining_after(&self, seq: SeqNum) -> i64 {
        self.highest_allowed().distance_from(seq)
    }

    fn raise(&self, cell: &AtomicU32, candidate: SeqNum) -> bool {
        let mut current = cell.load(Ordering::Acquire);
        loop {
            if !candidate.follows(SeqNum::new(current)) {
                return false;
            }
            match cell.compare_exchange_weak(
                current,
                candidate.value(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}
