// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ACK and congestion message bodies.
//!
//! Bounds-checked big-endian codec for the fields the core consumes. The
//! flags travel in the common packet header and are passed alongside the
//! body.
//!
//! ACK body layout:
//!
//! ```text
//!  0      2    3        6        10     12     14     16     18
//!  +------+----+--------+--------+------+------+------+------+
//!  | bits |ttl | rsvd   | base   |direct|indir.|d.adv |i.adv |
//!  +------+----+--------+--------+------+------+------+------+
//!  18            22           26          30            34
//!  +-------------+------------+-----------+-------------+--------
//!  | highest seq | flow info  | data rate | source IPv4 | bitmap ...
//!  +-------------+------------+-----------+-------------+--------
//! ```
//!
//! Bitmap bit `i` (bit `i % 8` of byte `i / 8`) set means packet `base + i`
//! is missing.

use std::convert::TryInto;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::seq::SeqNum;

/// Fixed part of the ACK body.
pub const ACK_HEADER_LEN: usize = 34;

/// Congestion body length.
pub const CONGESTION_BODY_LEN: usize = 12;

// ============================================================================
// Flags
// ============================================================================

/// ACK header flag bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AckFlags(u8);

impl AckFlags {
    /// Member has not heard a hello from its head.
    pub const HELLO_NOT_RECVD: AckFlags = AckFlags(1 << 0);
    /// Member is leaving.
    pub const TERMINATE_MEMBERSHIP: AckFlags = AckFlags(1 << 1);
    /// Body carries acknowledgement state.
    pub const ACK: AckFlags = AckFlags(1 << 2);
    /// Member saw congestion.
    pub const CONGESTION: AckFlags = AckFlags(1 << 3);
    /// Score was reported by the subtree, not the member.
    pub const SUBTREE_FLOW_CONTROL_INFO: AckFlags = AckFlags(1 << 4);
    /// Body carries a preferred data rate.
    pub const DATA_RATE: AckFlags = AckFlags(1 << 5);

    /// No flag set.
    pub const fn empty() -> Self {
        AckFlags(0)
    }

    /// Flags from the raw header byte.
    pub const fn from_bits(bits: u8) -> Self {
        AckFlags(bits)
    }

    /// Raw header byte.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True when every bit of `other` is set.
    pub const fn contains(self, other: AckFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of both flag sets.
    #[must_use]
    pub const fn with(self, other: AckFlags) -> Self {
        AckFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for AckFlags {
    type Output = AckFlags;

    fn bitor(self, rhs: AckFlags) -> AckFlags {
        self.with(rhs)
    }
}

// ============================================================================
// ACK
// ============================================================================

/// Decoded ACK/NACK body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckMessage {
    /// Header flags.
    pub flags: AckFlags,
    /// TTL the ACK was sent with.
    pub ttl: u8,
    /// First sequence covered by the bitmap (or last acked when empty).
    pub base: SeqNum,
    /// Reporter direct member count.
    pub direct_members: u16,
    /// Reporter indirect member count.
    pub indirect_members: u16,
    /// Reporter advertising direct heads.
    pub direct_advertising: u16,
    /// Reporter advertising indirect heads.
    pub indirect_advertising: u16,
    /// Ceiling the reporting member grants its head.
    pub highest_allowed: SeqNum,
    /// Reporter flow-control score (0-100).
    pub flow_control_info: u32,
    /// Rate the reporter prefers (bytes/s).
    pub data_rate: u32,
    /// Reporter unicast address.
    pub source: Ipv4Addr,
    bitmap_bits: u16,
    bitmap: Vec<u8>,
}

impl AckMessage {
    /// ACK with an empty bitmap.
    pub fn new(flags: AckFlags, base: SeqNum) -> Self {
        Self {
            flags,
            ttl: 0,
            base,
            direct_members: 0,
            indirect_members: 0,
            direct_advertising: 0,
            indirect_advertising: 0,
            highest_allowed: SeqNum::ZERO,
            flow_control_info: 0,
            data_rate: 0,
            source: Ipv4Addr::UNSPECIFIED,
            bitmap_bits: 0,
            bitmap: Vec::new(),
        }
    }

    /// Builder: mark packets missing, as offsets from `base`.
    pub fn with_missing(mut self, offsets: &[u16]) -> Self {
        for &offset in offsets {
            let bits = offset.saturating_add(1);
            if bits > self.bitmap_bits {
                self.bitmap_bits = bits;
                self.bitmap.resize(usize::from(bits).div_ceil(8), 0);
            }
            self.bitmap[usize::from(offset / 8)] |= 1 << (offset % 8);
        }
        self
    }

    /// Builder: ceiling granted to the head.
    pub fn with_highest_allowed(mut self, seq: SeqNum) -> Self {
        self.highest_allowed = seq;
        self
    }

    /// Builder: flow-control score.
    pub fn with_flow_control_info(mut self, score: u32) -> Self {
        self.flow_control_info = score;
        self
    }

    /// Bitmap length in bits.
    pub fn bitmap_bits(&self) -> u16 {
        self.bitmap_bits
    }

    /// Get the missing-packet bitmap bytes.
    pub fn bitmap(&self) -> &[u8] {
        &self.bitmap
    }

    /// Offsets from `base` reported missing, in increasing order.
    pub fn missing_offsets(&self) -> BitmapIter<'_> {
        BitmapIter {
            bitmap: &self.bitmap,
            bits: self.bitmap_bits,
            next: 0,
        }
    }

    /// Sequence numbers reported missing.
    pub fn missing_sequences(&self) -> impl Iterator<Item = SeqNum> + '_ {
        let base = self.base;
        self.missing_offsets().map(move |i| base.add(u32::from(i)))
    }

    /// Decode a body received with header `flags`.
    ///
    /// A bitmap shorter than its declared length rejects the whole ACK.
    pub fn decode(flags: AckFlags, buf: &[u8]) -> Result<Self> {
        if buf.len() < ACK_HEADER_LEN {
            return Err(Error::Truncated {
                needed: ACK_HEADER_LEN,
                available: buf.len(),
            });
        }
        let bitmap_bits = read_u16(buf, 0)?;
        let bitmap_len = usize::from(bitmap_bits).div_ceil(8);
        let present = buf.len() - ACK_HEADER_LEN;
        if present < bitmap_len {
            return Err(Error::MalformedAck {
                declared_bits: bitmap_bits,
                bitmap_len: present,
            });
        }

        Ok(Self {
            flags,
            ttl: buf[2],
            base: SeqNum::new(read_u32(buf, 6)?),
            direct_members: read_u16(buf, 10)?,
            indirect_members: read_u16(buf, 12)?,
            direct_advertising: read_u16(buf, 14)?,
            indirect_advertising: read_u16(buf, 16)?,
            highest_allowed: SeqNum::new(read_u32(buf, 18)?),
            flow_control_info: read_u32(buf, 22)?,
            data_rate: read_u32(buf, 26)?,
            source: Ipv4Addr::from(read_u32(buf, 30)?),
            bitmap_bits,
            bitmap: buf[ACK_HEADER_LEN..ACK_HEADER_LEN + bitmap_len].to_vec(),
        })
    }

    /// Encode the body (flags go in the packet header).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; ACK_HEADER_LEN];
        buf[0..2].copy_from_slice(&self.bitmap_bits.to_be_bytes());
        buf[2] = self.ttl;
        buf[6..10].copy_from_slice(&self.base.value().to_be_bytes());
        buf[10..12].copy_from_slice(&self.direct_members.to_be_bytes());
        buf[12..14].copy_from_slice(&self.indirect_members.to_be_bytes());
        buf[14..16].copy_from_slice(&self.direct_advertising.to_be_bytes());
        buf[16..18].copy_from_slice(&self.indirect_advertising.to_be_bytes());
        buf[18..22].copy_from_slice(&self.highest_allowed.value().to_be_bytes());
        buf[22..26].copy_from_slice(&self.flow_control_info.to_be_bytes());
        buf[26..30].copy_from_slice(&self.data_rate.to_be_bytes());
        buf[30..34].copy_from_slice(&u32::from(self.source).to_be_bytes());
        buf.extend_from_slice(&self.bitmap);
        buf
    }
}

/// Iterator over set bitmap offsets.
#[derive(Clone, Debug)]
pub struct BitmapIter<'a> {
    bitmap: &'a [u8],
    bits: u16,
    next: u16,
}

impl Iterator for BitmapIter<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        while self.next < self.bits {
            let i = self.next;
            self.next += 1;
            let byte = self.bitmap.get(usize::from(i / 8)).copied().unwrap_or(0);
            if byte & (1 << (i % 8)) != 0 {
                return Some(i);
            }
        }
        None
    }
}

// ============================================================================
// Congestion
// ============================================================================

/// Decoded congestion body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CongestionMessage {
    /// Sequence number the congestion was detected at.
    pub seq: SeqNum,
    /// Reporter flow-control score (0-100).
    pub flow_control_info: u32,
    /// Rate the reporter would like the sender to use.
    pub data_rate: u32,
    /// Score comes from the reporter's subtree, not the reporter itself.
    pub subtree: bool,
}

impl CongestionMessage {
    /// Header flag carrying `subtree`.
    pub const FLAG_SUBTREE_FLOW_CONTROL_INFO: u8 = 1 << 4;

    /// Decode a congestion body; `flags` supplies the subtree bit.
    pub fn decode(flags: u8, buf: &[u8]) -> Result<Self> {
        if buf.len() < CONGESTION_BODY_LEN {
            return Err(Error::Truncated {
                needed: CONGESTION_BODY_LEN,
                available: buf.len(),
            });
        }
        Ok(Self {
            seq: SeqNum::new(read_u32(buf, 0)?),
            flow_control_info: read_u32(buf, 4)?,
            data_rate: read_u32(buf, 8)?,
            subtree: flags & Self::FLAG_SUBTREE_FLOW_CONTROL_INFO != 0,
        })
    }

    /// Header flags for this message.
    pub fn flags(&self) -> u8 {
        if self.subtree {
            Self::FLAG_SUBTREE_FLOW_CONTROL_INFO
        } else {
            0
        }
    }

    /// Encode the fixed-size body.
    pub fn encode(&self) -> [u8; CONGESTION_BODY_LEN] {
        let mut buf = [0u8; CONGESTION_BODY_LEN];
        buf[0..4].copy_from_slice(&self.seq.value().to_be_bytes());
        buf[4..8].copy_from_slice(&self.flow_control_info.to_be_bytes());
        buf[8..12].copy_from_slice(&self.data_rate.to_be_bytes());
        buf
    }
}

fn read_u16(buf: &[u8], offset: usize) -> Result<u16> {
    buf.get(offset..offset + 2)
        .and_then(|b| b.try_into().ok())
        .map(u16::from_be_bytes)
        .ok_or(Error::Truncated {
            needed: offset + 2,
            available: buf.len(),
        })
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    buf.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or(Error::Truncated {
            needed: offset + 4,
            available: buf.len(),
        })
}
