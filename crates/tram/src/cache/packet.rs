// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packets carried by the caches.
//!
//! A [`DataPacket`] is shared (`Arc`) between the retransmission history and
//! the outbound queue. Its transmit bookkeeping is atomic so the ACK path can
//! read and set it without holding any cache lock.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::seq::SeqNum;

/// One data packet of the stream.
#[derive(Debug)]
pub struct DataPacket {
    seq: SeqNum,
    forget_before: SeqNum,
    flow_control_info: u32,
    payload: Vec<u8>,
    end_of_data: bool,
    transmit_pending: AtomicBool,
    last_transmit_ms: AtomicU64,
    data_rate: AtomicU64,
    retransmit_count: AtomicU32,
}

impl DataPacket {
    /// New packet carrying `payload`.
    pub fn new(seq: SeqNum, payload: Vec<u8>) -> Self {
        Self {
            seq,
            forget_before: SeqNum::ZERO,
            flow_control_info: 0,
            payload,
            end_of_data: false,
            transmit_pending: AtomicBool::new(false),
            last_transmit_ms: AtomicU64::new(0),
            data_rate: AtomicU64::new(0),
            retransmit_count: AtomicU32::new(0),
        }
    }

    /// Builder: receivers may forget packets before this sequence.
    pub fn with_forget_before(mut self, seq: SeqNum) -> Self {
        self.forget_before = seq;
        self
    }

    /// Builder: flow-control score stamped by the sender.
    pub fn with_flow_control_info(mut self, score: u32) -> Self {
        self.flow_control_info = score;
        self
    }

    /// Builder: last packet of the stream.
    pub fn with_end_of_data(mut self) -> Self {
        self.end_of_data = true;
        self
    }

    /// Get the sequence number.
    pub fn seq(&self) -> SeqNum {
        self.seq
    }

    /// Get the oldest sequence receivers must still repair.
    pub fn forget_before(&self) -> SeqNum {
        self.forget_before
    }

    /// Get the flow-control score carried in the header.
    pub fn flow_control_info(&self) -> u32 {
        self.flow_control_info
    }

    /// Get the payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True for an empty payload.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// True on the last packet of the stream.
    pub fn is_end_of_data(&self) -> bool {
        self.end_of_data
    }

    /// A (re)transmission is queued and has not gone out yet.
    pub fn is_transmit_pending(&self) -> bool {
        self.transmit_pending.load(Ordering::Acquire)
    }

    /// Claim the pending flag. Returns false if it was already set.
    pub fn try_mark_transmit_pending(&self) -> bool {
        self.transmit_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the pending flag without transmitting (e.g. enqueue failed).
    pub fn clear_transmit_pending(&self) {
        self.transmit_pending.store(false, Ordering::Release);
    }

    /// Wall-clock ms of the last transmission (0 = never sent).
    pub fn last_transmit_ms(&self) -> u64 {
        self.last_transmit_ms.load(Ordering::Acquire)
    }

    /// Rate (bytes/s) in force when the packet last went out.
    pub fn data_rate(&self) -> u64 {
        self.data_rate.load(Ordering::Acquire)
    }

    /// Get the number of repairs sent for this packet.
    pub fn retransmit_count(&self) -> u32 {
        self.retransmit_count.load(Ordering::Relaxed)
    }

    /// Stamp a completed transmission and clear the pending flag.
    pub fn mark_transmitted(&self, now_ms: u64, data_rate: u64, retransmission: bool) {
        self.last_transmit_ms.store(now_ms, Ordering::Release);
        self.data_rate.store(data_rate, Ordering::Release);
        if retransmission {
            self.retransmit_count.fetch_add(1, Ordering::Relaxed);
        }
        self.transmit_pending.store(false, Ordering::Release);
    }
}

/// Control message queued for output (ACK, congestion, hello...).
///
/// The body is already encoded; the core only routes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlPacket {
    /// Unicast or multicast destination.
    pub destination: SocketAddr,
    /// Encoded control body.
    pub body: Vec<u8>,
}

/// Unit stored in the [`PacketCache`](super::PacketCache).
#[derive(Clone, Debug)]
pub enum Packet {
    /// First transmission of a data packet.
    Data(Arc<DataPacket>),
    /// Repair transmission of a data packet; always uses the priority lane.
    Retransmit(Arc<DataPacket>),
    /// Encoded control message.
    Control(ControlPacket),
}

impl Packet {
    /// Sequence number of data packets.
    pub fn seq(&self) -> Option<SeqNum> {
        self.data().map(|pk| pk.seq())
    }

    /// Underlying data packet, if any.
    pub fn data(&self) -> Option<&Arc<DataPacket>> {
        match self {
            Packet::Data(pk) | Packet::Retransmit(pk) => Some(pk),
            Packet::Control(_) => None,
        }
    }

    /// True for [`Packet::Retransmit`].
    pub fn is_retransmission(&self) -> bool {
        matches!(self, Packet::Retransmit(_))
    }

    /// Bytes accounted against the cache byte counter.
    pub fn byte_len(&self) -> usize {
        match self {
            Packet::Data(pk) | Packet::Retransmit(pk) => pk.len(),
            Packet::Control(ctl) => ctl.body.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_claim_once() {
        let pk = DataPacket::new(SeqNum::new(9), vec![0; 10]);
        assert!(pk.try_mark_transmit_pending());
        assert!(!pk.try_mark_transmit_pending());
        pk.mark_transmitted(1_234, 8_000, true);
        assert!(!pk.is_transmit_pending());
        assert_eq!(pk.last_transmit_ms(), 1_234);
        assert_eq!(pk.data_rate(), 8_000);
        assert_eq!(pk.retransmit_count(), 1);
    }

    #[test]
    fn test_packet_accessors() {
        let pk = Arc::new(DataPacket::new(SeqNum::new(3), vec![1, 2, 3]));
        let data = Packet::Data(Arc::clone(&pk));
        let retx = Packet::Retransmit(pk);
        let ctl = Packet::Control(ControlPacket {
            destination: "127.0.0.1:9".parse().expect("addr"),
            body: vec![0; 34],
        });
        assert_eq!(data.seq(), Some(SeqNum::new(3)));
        assert!(retx.is_retransmission());
        assert_eq!(ctl.seq(), None);
        assert_eq!(data.byte_len(), 3);
        assert_eq!(ctl.byte_len(), 34);
    }
}
