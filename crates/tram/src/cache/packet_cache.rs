// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Two-lane blocking packet queue.
//!
//! ```text
//!   put(Retransmit) ──┐
//!   put_priority(..) ─┴► [ retransmit lane ] ─┐  (drained first, never bounded)
//!                                             ├──► get()
//!   put(Data/Control) ─► [  normal lane    ] ─┘  (FIFO, bounded by capacity)
//! ```
//!
//! One mutex guards both lanes, the byte counter and the closed flag, so the
//! capacity check and the wait are atomic. A producer waits only while the
//! normal lane holds more than `capacity` packets. Inbound caches have no
//! retransmit lane; repair and priority packets are queued in arrival order
//! with everything else, but priority puts still skip the capacity wait.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::packet::Packet;
use crate::error::{Error, Result};
use crate::seq::SeqNum;

/// Which side of the socket the cache sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Received packets waiting for the protocol threads.
    Inbound,
    /// Packets waiting for the output dispatcher.
    Outbound,
}

#[derive(Debug, Default)]
struct Lanes {
    normal: VecDeque<Packet>,
    retransmit: VecDeque<Packet>,
    bytes: usize,
    closed: bool,
}

impl Lanes {
    fn pop(&mut self) -> Option<Packet> {
        let packet = self
            .retransmit
            .pop_front()
            .or_else(|| self.normal.pop_front())?;
        self.bytes = self.bytes.saturating_sub(packet.byte_len());
        Some(packet)
    }

    fn data_packets(&self) -> impl Iterator<Item = SeqNum> + '_ {
        self.retransmit
            .iter()
            .chain(self.normal.iter())
            .filter_map(Packet::seq)
    }
}

/// Bounded, thread-safe packet queue with a priority retransmission lane.
#[derive(Debug)]
pub struct PacketCache {
    lanes: Mutex<Lanes>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
    direction: Direction,
}

impl PacketCache {
    /// New cache; `capacity` bounds the normal lane (0 = unbounded).
    pub fn new(direction: Direction, capacity: usize) -> Self {
        Self {
            lanes: Mutex::new(Lanes::default()),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity,
            direction,
        }
    }

    /// Cache feeding the output dispatcher.
    pub fn outbound(capacity: usize) -> Self {
        Self::new(Direction::Outbound, capacity)
    }

    /// Cache holding received packets.
    pub fn inbound(capacity: usize) -> Self {
        Self::new(Direction::Inbound, capacity)
    }

    /// Get the side of the socket this cache serves.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Get the normal lane bound (0 = unbounded).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Priority puts and outbound retransmissions never wait for capacity.
    fn bypasses_capacity(&self, packet: &Packet, priority: bool) -> bool {
        priority || (self.direction == Direction::Outbound && packet.is_retransmission())
    }

    fn normal_lane_full(&self, lanes: &Lanes) -> bool {
        self.capacity != 0 && lanes.normal.len() > self.capacity
    }

    fn push(&self, lanes: &mut Lanes, packet: Packet, priority: bool) {
        lanes.bytes += packet.byte_len();
        if priority {
            lanes.retransmit.push_back(packet);
        } else {
            lanes.normal.push_back(packet);
        }
        self.readable.notify_one();
    }

    /// Queue a packet, blocking while the normal lane is over capacity.
    ///
    /// Retransmissions on an outbound cache never block.
    pub fn put(&self, packet: Packet) -> Result<()> {
        self.enqueue(packet, false, true)
    }

    /// Queue a packet ahead of new data without waiting for capacity.
    ///
    /// Outbound caches put it in the retransmit lane; inbound caches append
    /// it to the normal lane.
    pub fn put_priority(&self, packet: Packet) -> Result<()> {
        self.enqueue(packet, true, true)
    }

    /// Queue a packet without blocking; `WouldBlock` when the normal lane is
    /// over capacity.
    pub fn try_put(&self, packet: Packet) -> Result<()> {
        self.enqueue(packet, false, false)
    }

    fn enqueue(&self, packet: Packet, priority: bool, block: bool) -> Result<()> {
        let bypass = self.bypasses_capacity(&packet, priority);
        let mut lanes = self.lanes.lock();
        while block && !bypass && !lanes.closed && self.normal_lane_full(&lanes) {
            self.writable.wait(&mut lanes);
        }
        if lanes.closed {
            return Err(Error::Closed);
        }
        if !bypass && self.normal_lane_full(&lanes) {
            return Err(Error::WouldBlock);
        }
        let retransmit_lane = bypass && self.direction == Direction::Outbound;
        self.push(&mut lanes, packet, retransmit_lane);
        Ok(())
    }

    /// Dequeue the next packet, retransmissions first. Blocks until a packet
    /// arrives or the cache is terminated.
    pub fn get(&self) -> Result<Packet> {
        let mut lanes = self.lanes.lock();
        loop {
            if lanes.closed {
                return Err(Error::Closed);
            }
            if let Some(packet) = lanes.pop() {
                self.writable.notify_one();
                return Ok(packet);
            }
            self.readable.wait(&mut lanes);
        }
    }

    /// Like [`get`](Self::get) but gives up after `timeout` with `Ok(None)`.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Option<Packet>> {
        let deadline = Instant::now() + timeout;
        let mut lanes = self.lanes.lock();
        loop {
            if lanes.closed {
                return Err(Error::Closed);
            }
            if let Some(packet) = lanes.pop() {
                self.writable.notify_one();
                return Ok(Some(packet));
            }
            if self.readable.wait_until(&mut lanes, deadline).timed_out() {
                return Ok(None);
            }
        }
    }

    /// Dequeue without blocking; `WouldBlock` when both lanes are empty.
    pub fn get_non_blocking(&self) -> Result<Packet> {
        let mut lanes = self.lanes.lock();
        if lanes.closed {
            return Err(Error::Closed);
        }
        let packet = lanes.pop().ok_or(Error::WouldBlock)?;
        self.writable.notify_one();
        Ok(packet)
    }

    /// Find a data packet by sequence number, retransmit lane first.
    ///
    /// With `keep == false` the packet is removed from the cache.
    pub fn get_by_sequence(&self, seq: SeqNum, keep: bool) -> Option<Packet> {
        let mut lanes = self.lanes.lock();
        let lanes = &mut *lanes;
        for lane in [&mut lanes.retransmit, &mut lanes.normal] {
            let Some(index) = lane.iter().position(|p| p.seq() == Some(seq)) else {
                continue;
            };
            if keep {
                return lane.get(index).cloned();
            }
            let packet = lane.remove(index)?;
            lanes.bytes = lanes.bytes.saturating_sub(packet.byte_len());
            self.writable.notify_one();
            return Some(packet);
        }
        None
    }

    /// Lowest queued data sequence number, or 0 when none is queued.
    pub fn lowest_sequence(&self) -> SeqNum {
        let lanes = self.lanes.lock();
        lanes
            .data_packets()
            .reduce(SeqNum::earliest)
            .unwrap_or(SeqNum::ZERO)
    }

    /// Highest queued data sequence number, or 0 when none is queued.
    pub fn highest_sequence(&self) -> SeqNum {
        let lanes = self.lanes.lock();
        lanes
            .data_packets()
            .reduce(SeqNum::latest)
            .unwrap_or(SeqNum::ZERO)
    }

    /// Payload bytes currently queued.
    pub fn byte_count(&self) -> usize {
        self.lanes.lock().bytes
    }

    /// Packets queued in both lanes.
    pub fn len(&self) -> usize {
        let lanes = self.lanes.lock();
        lanes.normal.len() + lanes.retransmit.len()
    }

    /// True when both lanes are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Packets waiting in the retransmit lane.
    pub fn retransmit_len(&self) -> usize {
        self.lanes.lock().retransmit.len()
    }

    /// Wake every blocked caller; later calls fail with `Closed`.
    pub fn terminate(&self) {
        let mut lanes = self.lanes.lock();
        if !lanes.closed {
            lanes.closed = true;
            log::debug!(
                "[PacketCache::terminate] {:?} cache closed with {} packets queued",
                self.direction,
                lanes.normal.len() + lanes.retransmit.len()
            );
        }
        drop(lanes);
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// True once [`terminate`](Self::terminate) has been called.
    pub fn is_closed(&self) -> bool {
        self.lanes.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DataPacket;
    use std::sync::Arc;

    fn data(seq: u32) -> Packet {
        Packet::Data(Arc::new(DataPacket::new(SeqNum::new(seq), vec![0; 100])))
    }

    fn retx(seq: u32) -> Packet {
        Packet::Retransmit(Arc::new(DataPacket::new(SeqNum::new(seq), vec![0; 100])))
    }

    #[test]
    fn test_fifo_order() {
        let cache = PacketCache::outbound(0);
        for seq in 1..=3 {
            cache.put(data(seq)).expect("put");
        }
        for seq in 1..=3 {
            assert_eq!(cache.get().expect("get").seq(), Some(SeqNum::new(seq)));
        }
    }

    #[test]
    fn test_retransmit_lane_first() {
        let cache = PacketCache::outbound(0);
        cache.put(data(10)).expect("put");
        cache.put(data(11)).expect("put");
        cache.put(retx(3)).expect("put");
        cache.put(retx(4)).expect("put");

        assert_eq!(cache.retransmit_len(), 2);
        let order: Vec<_> = (0..4)
            .map(|_| cache.get().expect("get").seq().expect("data").value())
            .collect();
        assert_eq!(order, vec![3, 4, 10, 11]);
    }

    #[test]
    fn test_inbound_has_no_priority_lane() {
        let cache = PacketCache::inbound(0);
        cache.put(data(10)).expect("put");
        cache.put(retx(3)).expect("put");
        assert_eq!(cache.retransmit_len(), 0);
        assert_eq!(cache.get().expect("get").seq(), Some(SeqNum::new(10)));
    }

    #[test]
    fn test_try_put_respects_capacity_but_not_for_retransmissions() {
        let cache = PacketCache::outbound(2);
        cache.try_put(data(1)).expect("room");
        cache.try_put(data(2)).expect("room");
        cache.try_put(data(3)).expect("at capacity, not over it");
        assert_eq!(cache.try_put(data(4)), Err(Error::WouldBlock));
        cache.try_put(retx(1)).expect("retransmit lane is unbounded");
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_lane_blocks_only_when_over_capacity() {
        let cache = PacketCache::outbound(1);
        cache.try_put(data(1)).expect("empty lane");
        cache.try_put(data(2)).expect("lane at capacity still accepts");
        assert_eq!(cache.try_put(data(3)), Err(Error::WouldBlock));
    }

    #[test]
    fn test_priority_put_skips_full_lane() {
        let cache = PacketCache::outbound(1);
        cache.put(data(1)).expect("put");
        cache.put(data(2)).expect("put");
        let ack = Packet::Control(crate::cache::ControlPacket {
            destination: "127.0.0.1:9".parse().expect("addr"),
            body: vec![7; 4],
        });
        cache.put_priority(ack).expect("never waits");
        assert_eq!(cache.retransmit_len(), 1);
        assert!(matches!(cache.get().expect("get"), Packet::Control(_)));
        assert_eq!(cache.get().expect("get").seq(), Some(SeqNum::new(1)));
    }

    #[test]
    fn test_inbound_priority_put_keeps_arrival_order() {
        let cache = PacketCache::inbound(1);
        cache.put(data(1)).expect("put");
        cache.put(data(2)).expect("put");
        cache.put_priority(data(3)).expect("never waits");
        assert_eq!(cache.retransmit_len(), 0);
        let order: Vec<_> = (0..3)
            .map(|_| cache.get().expect("get").seq().expect("data").value())
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_byte_counter() {
        let cache = PacketCache::outbound(0);
        cache.put(data(1)).expect("put");
        cache.put(retx(2)).expect("put");
        assert_eq!(cache.byte_count(), 200);
        cache.get_by_sequence(SeqNum::new(2), false).expect("found");
        assert_eq!(cache.byte_count(), 100);
        cache.get_by_sequence(SeqNum::new(1), true).expect("found");
        assert_eq!(cache.byte_count(), 100);
        cache.get().expect("get");
        assert_eq!(cache.byte_count(), 0);
    }

    #[test]
    fn test_get_by_sequence_prefers_retransmit_lane() {
        let cache = PacketCache::outbound(0);
        cache.put(data(7)).expect("put");
        cache.put(retx(7)).expect("put");
        let found = cache.get_by_sequence(SeqNum::new(7), false).expect("found");
        assert!(found.is_retransmission());
        assert_eq!(cache.len(), 1);
        assert!(cache.get_by_sequence(SeqNum::new(8), true).is_none());
    }

    #[test]
    fn test_bounds_data_only() {
        let cache = PacketCache::outbound(0);
        assert_eq!(cache.lowest_sequence(), SeqNum::ZERO);
        assert_eq!(cache.highest_sequence(), SeqNum::ZERO);
        cache
            .put(Packet::Control(crate::cache::ControlPacket {
                destination: "127.0.0.1:1".parse().expect("addr"),
                body: vec![1],
            }))
            .expect("put");
        assert_eq!(cache.lowest_sequence(), SeqNum::ZERO);
        cache.put(data(u32::MAX)).expect("put");
        cache.put(data(1)).expect("put");
        cache.put(retx(5)).expect("put");
        assert_eq!(cache.lowest_sequence(), SeqNum::new(u32::MAX));
        assert_eq!(cache.highest_sequence(), SeqNum::new(5));
    }

    #[test]
    fn test_non_blocking_and_timeout() {
        let cache = PacketCache::outbound(0);
        assert_eq!(cache.get_non_blocking().err(), Some(Error::WouldBlock));
        assert!(cache
            .get_timeout(Duration::from_millis(5))
            .expect("open")
            .is_none());
        cache.put(data(1)).expect("put");
        assert!(cache.get_non_blocking().is_ok());
    }

    #[test]
    fn test_terminate_wakes_blocked_getter() {
        let cache = Arc::new(PacketCache::outbound(0));
        let getter = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || cache.get())
        };
        std::thread::sleep(Duration::from_millis(20));
        cache.terminate();
        let result = getter.join().expect("getter panicked");
        assert_eq!(result.err(), Some(Error::Closed));
        assert_eq!(cache.get().err(), Some(Error::Closed));
        assert_eq!(cache.put(data(1)), Err(Error::Closed));
    }

    #[test]
    fn test_put_blocks_until_space() {
        let cache = Arc::new(PacketCache::outbound(1));
        cache.put(data(1)).expect("put");
        cache.put(data(2)).expect("put");
        let putter = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || cache.put(data(3)))
        };
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get().expect("get").seq(), Some(SeqNum::new(1)));
        putter.join().expect("putter panicked").expect("put");
        assert_eq!(cache.get().expect("get").seq(), Some(SeqNum::new(2)));
        assert_eq!(cache.get().expect("get").seq(), Some(SeqNum::new(3)));
    }
}
