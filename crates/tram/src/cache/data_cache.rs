// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Retransmission history.
//!
//! Keeps every data packet this node sent (or relays as a head) until all
//! direct members have acknowledged it. Entries are ordered by sequence
//! number; purging removes from the front only.
//!
//! Sizing follows three marks derived from the cache size:
//!
//! ```text
//!   0 ....... low (size/3) ....... high (2*size/3) ....... size
//!             purge target          purge trigger          "cache full"
//! ```
//!
//! While full, a sender stops producing new data
//! ([`wait_until_not_full`](DataCache::wait_until_not_full)).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::packet::DataPacket;
use crate::seq::SeqNum;

/// Cache entry for a single data packet.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cached packet.
    pub packet: Arc<DataPacket>,
    /// Packet has been handed to the local application (always true on the sender).
    pub delivered: bool,
}

#[derive(Debug)]
struct History {
    entries: VecDeque<CacheEntry>,
    high_water_mark: usize,
}

/// Thread-safe retransmission history.
#[derive(Debug)]
pub struct DataCache {
    history: Mutex<History>,
    not_full: Condvar,
    full: AtomicBool,
    size: usize,
    low_water_mark: usize,
    default_high_water_mark: usize,
    ack_window: usize,
}

impl DataCache {
    /// History holding up to `size` packets.
    pub fn new(size: usize, ack_window: u32) -> Self {
        let default_high_water_mark = (size * 2) / 3;
        Self {
            history: Mutex::new(History {
                entries: VecDeque::with_capacity(size),
                high_water_mark: default_high_water_mark,
            }),
            not_full: Condvar::new(),
            full: AtomicBool::new(false),
            size,
            low_water_mark: size / 3,
            default_high_water_mark,
            ack_window: ack_window as usize,
        }
    }

    /// Store a packet. Returns true when the high-water mark is reached and
    /// the owner should purge.
    pub fn insert(&self, packet: Arc<DataPacket>, delivered: bool) -> bool {
        let mut history = self.history.lock();
        let seq = packet.seq();
        let position = history
            .entries
            .iter()
            .rposition(|e| e.packet.seq().precedes(seq));
        let index = position.map_or(0, |i| i + 1);
        if history
            .entries
            .get(index)
            .is_some_and(|e| e.packet.seq() == seq)
        {
            log::trace!("[DataCache::insert] duplicate packet {}", seq);
            return history.entries.len() >= history.high_water_mark;
        }
        history.entries.insert(index, CacheEntry { packet, delivered });
        history.entries.len() >= history.high_water_mark
    }

    /// Packet with this sequence number, if still cached.
    pub fn get(&self, seq: SeqNum) -> Option<Arc<DataPacket>> {
        self.history
            .lock()
            .entries
            .iter()
            .find(|e| e.packet.seq() == seq)
            .map(|e| Arc::clone(&e.packet))
    }

    /// Flag a packet as handed to the application.
    pub fn mark_delivered(&self, seq: SeqNum) -> bool {
        let mut history = self.history.lock();
        match history.entries.iter_mut().find(|e| e.packet.seq() == seq) {
            Some(entry) => {
                entry.delivered = true;
                true
            }
            None => false,
        }
    }

    /// Oldest cached sequence number.
    pub fn lowest_sequence(&self) -> Option<SeqNum> {
        self.history.lock().entries.front().map(|e| e.packet.seq())
    }

    /// Newest cached sequence number.
    pub fn highest_sequence(&self) -> Option<SeqNum> {
        self.history.lock().entries.back().map(|e| e.packet.seq())
    }

    /// Packets currently cached.
    pub fn len(&self) -> usize {
        self.history.lock().entries.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.history.lock().entries.is_empty()
    }

    /// Get the history bound.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the purge target.
    pub fn low_water_mark(&self) -> usize {
        self.low_water_mark
    }

    /// Get the current purge trigger.
    pub fn high_water_mark(&self) -> usize {
        self.history.lock().high_water_mark
    }

    /// Cache reached its size; the sender must not produce new data.
    pub fn is_full(&self) -> bool {
        self.full.load(Ordering::Acquire)
    }

    /// Remove acknowledged packets from the front until at most `keep`
    /// remain. Stops at the first packet at or after `stop` or not yet
    /// delivered to the application. Returns the remaining size.
    pub fn purge(&self, stop: SeqNum, keep: usize) -> usize {
        let mut history = self.history.lock();
        let before = history.entries.len();
        let removable = history
            .entries
            .iter()
            .take(before.saturating_sub(keep))
            .take_while(|e| e.packet.seq().precedes(stop) && e.delivered)
            .count();
        history.entries.drain(..removable);
        let remaining = history.entries.len();

        if remaining >= history.high_water_mark {
            history.high_water_mark += self.ack_window;
            log::debug!(
                "[DataCache::purge] stuck at {} packets (stop {}), high water mark now {}",
                remaining,
                stop,
                history.high_water_mark
            );
        } else if remaining < self.default_high_water_mark {
            history.high_water_mark = self.default_high_water_mark;
        }

        if removable > 0 {
            log::trace!(
                "[DataCache::purge] {} -> {} packets, stop {}",
                before,
                remaining,
                stop
            );
        }
        self.update_full(remaining);
        remaining
    }

    /// Block until the cache is no longer full. Returns false on timeout.
    pub fn wait_until_not_full(&self, timeout: Duration) -> bool {
        let mut history = self.history.lock();
        if !self.is_full() {
            return true;
        }
        let _ = self.not_full.wait_while_for(
            &mut history,
            |_| self.full.load(Ordering::Acquire),
            timeout,
        );
        !self.is_full()
    }

    fn update_full(&self, remaining: usize) {
        if remaining >= self.size {
            if !self.full.swap(true, Ordering::AcqRel) {
                log::warn!("[DataCache] cache full: {} packets", remaining);
            }
        } else if self.full.swap(false, Ordering::AcqRel) {
            log::debug!("[DataCache] cache no longer full: {} packets", remaining);
            self.not_full.notify_all();
        }
    }
}
