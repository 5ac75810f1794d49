// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-capacity member id allocator.
//!
//! Ids are small integers in `1..=capacity`, backed by `ceil(capacity / 32)`
//! 32-bit words. Bit `n` of word `w` represents id `w * 32 + n + 1`; id 0 is
//! never assigned.

use parking_lot::Mutex;

/// Bits per mask word.
const WORD_BITS: u32 = 32;

/// Stable member id handed out by [`MembershipMask`]. Never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(u32);

impl MemberId {
    /// Wrap a raw id; zero is rejected.
    pub fn new(raw: u32) -> Option<Self> {
        (raw != 0).then_some(MemberId(raw))
    }

    /// Get the raw id (1-based).
    pub fn get(self) -> u32 {
        self.0
    }

    /// Word index and bit mask locating this id.
    fn locate(self) -> (usize, u32) {
        let zero_based = self.0 - 1;
        (
            (zero_based / WORD_BITS) as usize,
            1u32 << (zero_based % WORD_BITS),
        )
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread-safe member id bitset. One lock per mask.
#[derive(Debug)]
pub struct MembershipMask {
    words: Mutex<Vec<u32>>,
    capacity: u32,
}

impl MembershipMask {
    /// Mask able to hold `capacity` members.
    pub fn new(capacity: usize) -> Self {
        let capacity = u32::try_from(capacity).unwrap_or(u32::MAX);
        let word_count = capacity.div_ceil(WORD_BITS) as usize;
        Self {
            words: Mutex::new(vec![0; word_count]),
            capacity,
        }
    }

    /// Maximum number of ids this mask hands out.
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Claim the lowest free id, or `None` when all are taken.
    pub fn assign_new_member_bit(&self) -> Option<MemberId> {
        let mut words = self.words.lock();
        for (index, word) in words.iter_mut().enumerate() {
            if *word == u32::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros();
            let raw = index as u32 * WORD_BITS + bit + 1;
            if raw > self.capacity {
                return None;
            }
            *word |= 1u32 << bit;
            return MemberId::new(raw);
        }
        None
    }

    /// Release an id. Idempotent; out-of-range ids are ignored.
    pub fn clear_member_bit(&self, id: MemberId) {
        let (index, bit) = id.locate();
        if let Some(word) = self.words.lock().get_mut(index) {
            *word &= !bit;
        }
    }

    /// Mark an id as taken. Idempotent; out-of-range ids are ignored.
    pub fn set_member_bit(&self, id: MemberId) {
        let (index, bit) = id.locate();
        if let Some(word) = self.words.lock().get_mut(index) {
            *word |= bit;
        }
    }

    /// True when `id` is assigned.
    pub fn is_member_bit_set(&self, id: MemberId) -> bool {
        let (index, bit) = id.locate();
        self.words
            .lock()
            .get(index)
            .is_some_and(|word| word & bit != 0)
    }

    /// No id is currently assigned.
    pub fn is_empty(&self) -> bool {
        self.words.lock().iter().all(|w| *w == 0)
    }

    /// Deep, immutable copy of the current bits.
    pub fn snapshot(&self) -> MaskSnapshot {
        MaskSnapshot {
            words: self.words.lock().clone().into_boxed_slice(),
        }
    }
}

/// Point-in-time copy of a [`MembershipMask`], detached from later changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaskSnapshot {
    words: Box<[u32]>,
}

impl MaskSnapshot {
    /// True when `id` was set at snapshot time.
    pub fn contains(&self, id: MemberId) -> bool {
        let (index, bit) = id.locate();
        self.words.get(index).is_some_and(|word| word & bit != 0)
    }

    /// True when no id was set at snapshot time.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Number of ids set.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Raw words, lowest ids first.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Ids set, ascending.
    pub fn ids(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.words.iter().enumerate().flat_map(|(index, word)| {
            (0..WORD_BITS)
                .filter(move |bit| word & (1u32 << bit) != 0)
                .filter_map(move |bit| MemberId::new(index as u32 * WORD_BITS + bit + 1))
        })
    }
}
