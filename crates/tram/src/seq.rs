// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wraparound-safe 32-bit sequence numbers.
//!
//! Data packets are numbered in a circular 32-bit space. Two values are
//! compared through their absolute distance: when the distance reaches the
//! rollover threshold the numerically larger value is considered *earlier*
//! (it belongs to the previous lap).
//!
//! ```text
//!   0 ........ a ........ 0x7fff_ffff ........ b ........ 0xffff_ffff
//!              |<-------- diff >= threshold ------->|
//!   b precedes a (b is from the lap before the wrap)
//! ```
//!
//! The order is total over any window narrower than half the space, which is
//! all the protocol ever needs. `SeqNum` therefore implements `PartialOrd`
//! but deliberately not `Ord`.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

/// Distance at which comparison switches to the wrapped interpretation.
pub const ROLLOVER_THRESHOLD: u32 = 0x7fff_ffff;

/// Sequence number in the circular 32-bit space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SeqNum(u32);

impl SeqNum {
    /// Zero, also used as the "none" value by cache bound queries.
    pub const ZERO: SeqNum = SeqNum(0);

    /// Wrap a raw value.
    #[inline]
    pub const fn new(value: u32) -> Self {
        SeqNum(value)
    }

    /// Raw value.
    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Wraparound-aware three-way comparison.
    #[inline]
    pub fn compare(self, other: SeqNum) -> Ordering {
        if self.0 == other.0 {
            return Ordering::Equal;
        }
        let diff = self.0.abs_diff(other.0);
        let numeric = self.0.cmp(&other.0);
        if diff >= ROLLOVER_THRESHOLD {
            numeric.reverse()
        } else {
            numeric
        }
    }

    /// `self` comes strictly before `other`.
    #[inline]
    pub fn precedes(self, other: SeqNum) -> bool {
        self.compare(other) == Ordering::Less
    }

    /// `self` comes strictly after `other`.
    #[inline]
    pub fn follows(self, other: SeqNum) -> bool {
        self.compare(other) == Ordering::Greater
    }

    /// `self` comes before or equals `other`.
    #[inline]
    pub fn precedes_or_eq(self, other: SeqNum) -> bool {
        self.compare(other) != Ordering::Greater
    }

    /// `self` comes after or equals `other`.
    #[inline]
    pub fn follows_or_eq(self, other: SeqNum) -> bool {
        self.compare(other) != Ordering::Less
    }

    /// Next value, wrapping.
    #[inline]
    #[must_use]
    pub fn increment(self) -> SeqNum {
        SeqNum(self.0.wrapping_add(1))
    }

    /// Previous value, wrapping.
    #[inline]
    #[must_use]
    pub fn decrement(self) -> SeqNum {
        SeqNum(self.0.wrapping_sub(1))
    }

    /// `self + n`, wrapping.
    #[inline]
    #[must_use]
    pub fn add(self, n: u32) -> SeqNum {
        SeqNum(self.0.wrapping_add(n))
    }

    /// `self - n`, wrapping.
    #[inline]
    #[must_use]
    pub fn subtract(self, n: u32) -> SeqNum {
        SeqNum(self.0.wrapping_sub(n))
    }

    /// Signed distance `self - other` (positive when `self` is ahead).
    #[inline]
    pub fn distance_from(self, other: SeqNum) -> i64 {
        i64::from(self.0.wrapping_sub(other.0) as i32)
    }

    /// Earlier of two values.
    #[inline]
    pub fn earliest(self, other: SeqNum) -> SeqNum {
        if other.precedes(self) {
            other
        } else {
            self
        }
    }

    /// Later of two values.
    #[inline]
    pub fn latest(self, other: SeqNum) -> SeqNum {
        if other.follows(self) {
            other
        } else {
            self
        }
    }
}

impl PartialOrd for SeqNum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(*other))
    }
}

impl From<u32> for SeqNum {
    fn from(value: u32) -> Self {
        SeqNum(value)
    }
}

impl From<SeqNum> for u32 {
    fn from(seq: SeqNum) -> Self {
        seq.0
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbound sequence number generator.
///
/// Starts at 1 and wraps through the full 32-bit space. Thread-safe via
/// `AtomicU32`; `fetch_add` wraps on overflow.
#[derive(Debug)]
pub struct SeqNumGenerator {
    next: AtomicU32,
}

impl SeqNumGenerator {
    /// Generator starting at 1.
    pub fn new() -> Self {
        Self::starting_at(SeqNum::new(1))
    }

    /// Generator starting at an arbitrary value.
    pub fn starting_at(first: SeqNum) -> Self {
        Self {
            next: AtomicU32::new(first.value()),
        }
    }

    /// Assign the next sequence number.
    #[inline]
    pub fn next(&self) -> SeqNum {
        SeqNum(self.next.fetch_add(1, AtomicOrdering::Relaxed))
    }

    /// Value the next call to `next()` will return.
    #[inline]
    pub fn current(&self) -> SeqNum {
        SeqNum(self.next.load(AtomicOrdering::Relaxed))
    }
}

impl Default for SeqNumGenerator {
    fn default() -> Self {
        Self::new()
    }
}
