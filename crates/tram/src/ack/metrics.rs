// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metrics for ACK and congestion processing
//!
//! Tracks acknowledgements, repair requests and what became of them.

use std::sync::atomic::{AtomicU64, Ordering};

/// ACK processing metrics collector
///
/// # Thread Safety
///
/// All methods use atomic operations (Relaxed ordering) for lock-free updates.
#[derive(Debug, Default)]
pub struct AckMetrics {
    /// ACKs with an empty bitmap
    acks: AtomicU64,

    /// ACKs reporting at least one missing packet
    nacks: AtomicU64,

    /// Missing packets reported across all NACKs
    missing_reported: AtomicU64,

    /// Retransmissions put in the packet cache
    retransmits_queued: AtomicU64,

    /// Requests skipped because a repair was pending or recent
    retransmits_suppressed: AtomicU64,

    /// Requests for packets not produced yet
    retransmits_deferred: AtomicU64,

    /// Requests for packets already purged from the history
    packets_unavailable: AtomicU64,

    /// ACKs from unknown senders, or rejected by the decoder
    acks_dropped: AtomicU64,

    /// Congestion reports acted upon
    congestion_handled: AtomicU64,

    /// Congestion reports ignored as duplicates of a handled window
    congestion_duplicates: AtomicU64,
}

/// Point-in-time copy of [`AckMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AckMetricsSnapshot {
    /// ACKs with an empty bitmap.
    pub acks: u64,
    /// ACKs reporting missing packets.
    pub nacks: u64,
    /// Missing packets reported across all NACKs.
    pub missing_reported: u64,
    /// Repairs queued.
    pub retransmits_queued: u64,
    /// Repair requests suppressed.
    pub retransmits_suppressed: u64,
    /// Requests for packets not produced yet.
    pub retransmits_deferred: u64,
    /// Requests for purged packets.
    pub packets_unavailable: u64,
    /// ACKs dropped before processing.
    pub acks_dropped: u64,
    /// Congestion reports acted upon.
    pub congestion_handled: u64,
    /// Congestion reports for an already handled window.
    pub congestion_duplicates: u64,
}

impl AckMetrics {
    /// Create a collector with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one processed ACK reporting `missing` packets.
    pub fn record_ack(&self, missing: u64) {
        if missing == 0 {
            self.acks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.nacks.fetch_add(1, Ordering::Relaxed);
            self.missing_reported.fetch_add(missing, Ordering::Relaxed);
        }
    }

    /// Count a queued repair.
    pub fn increment_retransmits_queued(&self) {
        self.retransmits_queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a suppressed repair request.
    pub fn increment_retransmits_suppressed(&self) {
        self.retransmits_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a deferred repair request.
    pub fn increment_retransmits_deferred(&self) {
        self.retransmits_deferred.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a request for a purged packet.
    pub fn increment_packets_unavailable(&self) {
        self.packets_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a dropped ACK.
    pub fn increment_acks_dropped(&self) {
        self.acks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a handled congestion report.
    pub fn increment_congestion_handled(&self) {
        self.congestion_handled.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a duplicate congestion report.
    pub fn increment_congestion_duplicates(&self) {
        self.congestion_duplicates.fetch_add(1, Ordering::Relaxed);
    }

    /// Load all counters.
    pub fn snapshot(&self) -> AckMetricsSnapshot {
        AckMetricsSnapshot {
            acks: self.acks.load(Ordering::Relaxed),
            nacks: self.nacks.load(Ordering::Relaxed),
            missing_reported: self.missing_reported.load(Ordering::Relaxed),
            retransmits_queued: self.retransmits_queued.load(Ordering::Relaxed),
            retransmits_suppressed: self.retransmits_suppressed.load(Ordering::Relaxed),
            retransmits_deferred: self.retransmits_deferred.load(Ordering::Relaxed),
            packets_unavailable: self.packets_unavailable.load(Ordering::Relaxed),
            acks_dropped: self.acks_dropped.load(Ordering::Relaxed),
            congestion_handled: self.congestion_handled.load(Ordering::Relaxed),
            congestion_duplicates: self.congestion_duplicates.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_and_nack_counted_separately() {
        let metrics = AckMetrics::new();
        metrics.record_ack(0);
        metrics.record_ack(3);
        metrics.record_ack(2);
        let snap = metrics.snapshot();
        assert_eq!(snap.acks, 1);
        assert_eq!(snap.nacks, 2);
        assert_eq!(snap.missing_reported, 5);
    }

    #[test]
    fn test_concurrent_increments() {
        use std::sync::Arc;

        let metrics = Arc::new(AckMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        m.increment_retransmits_queued();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread panicked");
        }
        assert_eq!(metrics.snapshot().retransmits_queued, 4000);
    }
}
