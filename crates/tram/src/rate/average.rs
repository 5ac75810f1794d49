// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Moving average of the transfer rate.
//!
//! Samples of the cumulative byte counter are kept over a trailing horizon;
//! the rate is the byte delta between the oldest kept sample and now.

use std::collections::VecDeque;

/// Hard bound on kept samples.
const MAX_SAMPLES: usize = 1000;

#[derive(Debug, Clone, Copy)]
struct Sample {
    at_ms: u64,
    total_bytes: u64,
}

/// Trailing-horizon average-rate estimator (bytes per second).
#[derive(Debug, Clone)]
pub struct AverageRate {
    samples: VecDeque<Sample>,
    horizon_ms: u64,
    average: u64,
}

impl AverageRate {
    /// Estimator over `horizon_ms` (0 keeps samples until the hard bound).
    pub fn new(horizon_ms: u64) -> Self {
        Self {
            samples: VecDeque::with_capacity(64),
            horizon_ms,
            average: 0,
        }
    }

    /// Last computed average.
    pub fn average(&self) -> u64 {
        self.average
    }

    /// Add a sample of the cumulative byte counter and recompute.
    ///
    /// The average is left unchanged when no time has elapsed since the
    /// oldest kept sample. `cap` bounds the result (sender side).
    pub fn record(&mut self, now_ms: u64, total_bytes: u64, cap: Option<u64>) -> u64 {
        self.samples.push_back(Sample {
            at_ms: now_ms,
            total_bytes,
        });
        if self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }

        if self.horizon_ms != 0 {
            let expired = self
                .samples
                .iter()
                .take_while(|s| now_ms.saturating_sub(s.at_ms) >= self.horizon_ms)
                .count();
            if expired > 0 && self.samples.len() > 2 {
                // keep at least two samples so a rate can still be derived
                let expired = expired.min(self.samples.len() - 2);
                self.samples.drain(..expired);
            }
        }

        let Some(first) = self.samples.front().copied() else {
            return self.average;
        };
        let elapsed = now_ms.saturating_sub(first.at_ms);
        if elapsed == 0 {
            return self.average;
        }
        let rate = total_bytes.saturating_sub(first.total_bytes) * 1000 / elapsed;
        self.average = match cap {
            Some(cap) => rate.min(cap),
            None => rate,
        };
        self.average
    }

    /// Samples currently in the horizon.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}
