// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport profile.
//!
//! The subset of session parameters the delivery and congestion-control
//! core consumes: ACK window geometry, rate bounds, cache sizing and the
//! pruning policy. Loading a profile from a file is left to the embedding
//! application (enable the `serde` feature for `Deserialize`).

use std::time::Duration;

use crate::membership::Mrole;

/// Minimum allowed congestion-window multiple of the ACK window.
pub const MIN_CONGESTION_WINDOW_MULTIPLE: u32 = 2;

/// Maximum allowed congestion-window multiple of the ACK window.
pub const MAX_CONGESTION_WINDOW_MULTIPLE: u32 = 5;

/// Direction(s) of data flow for this node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportMode {
    /// Receiver; may act as a repair head.
    #[default]
    ReceiveOnly,
    /// Data source at the root of the tree.
    SendOnly,
    /// Both (sender that also receives).
    SendReceive,
}

impl TransportMode {
    /// Node originates the data stream.
    pub fn is_sender(self) -> bool {
        matches!(self, TransportMode::SendOnly | TransportMode::SendReceive)
    }
}

/// Transport profile consumed by the TRAM core.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransportProfile {
    // === Windows ===
    /// Packets per ACK window.
    pub ack_window: u32,

    /// Packets a member may run ahead of its last ACK.
    pub congestion_window: u32,

    /// Ceiling on the congestion window, as a multiple of the ACK window.
    pub max_congestion_window_multiple: u32,

    // === Rate (bytes/sec) ===
    /// Floor for the transmit rate.
    pub min_data_rate: u64,

    /// Ceiling for the transmit rate.
    pub max_data_rate: u64,

    /// Fraction of the current rate added per ACK window in steady state.
    pub rate_increase_factor: f64,

    /// Trailing horizon of the average-rate estimator (zero keeps all samples).
    pub avg_rate_horizon: Duration,

    // === Packets ===
    /// Largest data packet on the wire (bytes).
    pub max_packet_size: u32,

    // === Membership ===
    /// Maximum directly attached members.
    pub max_members: usize,

    /// Role this node is willing to play in the tree.
    pub mrole: Mrole,

    /// Sender, receiver, or both.
    pub mode: TransportMode,

    // === Pruning ===
    /// How many ACK windows a member may lag before decentralized pruning.
    pub pruning_window: f64,

    /// Let heads prune lagging members themselves.
    pub decentralized_pruning: bool,

    /// Congestion reports at minimum rate before a prune candidate is flagged.
    pub max_consecutive_congestion_count: u32,

    // === Caches ===
    /// Outbound FIFO lane capacity in packets (0 = unbounded).
    pub cache_capacity: usize,

    /// Retransmission history size in packets.
    pub data_cache_size: usize,
}

impl Default for TransportProfile {
    fn default() -> Self {
        Self {
            // Windows
            ack_window: 32,
            congestion_window: 64,            // 2 x ack window
            max_congestion_window_multiple: 5,

            // Rate
            min_data_rate: 1_000,                      // 1 KB/s floor
            max_data_rate: 64_000,                     // 64 KB/s ceiling
            rate_increase_factor: 0.15,                // +15% per window
            avg_rate_horizon: Duration::from_secs(5), // 5s moving average

            // Packets
            max_packet_size: 1454,

            // Membership
            max_members: 32,
            mrole: Mrole::MemberReluctantHead,
            mode: TransportMode::ReceiveOnly,

            // Pruning
            pruning_window: 1.5,
            decentralized_pruning: false,
            max_consecutive_congestion_count: 1,

            // Caches
            cache_capacity: 0,
            data_cache_size: 1200,
        }
    }
}

impl TransportProfile {
    /// Profile with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default profile for the data source.
    pub fn sender() -> Self {
        Self {
            mode: TransportMode::SendOnly,
            ..Default::default()
        }
    }

    /// Builder: set the ACK window; the congestion window follows at 2x.
    pub fn with_ack_window(mut self, packets: u32) -> Self {
        self.ack_window = packets;
        self.congestion_window = packets.saturating_mul(2);
        self
    }

    /// Builder: set the congestion window.
    pub fn with_congestion_window(mut self, packets: u32) -> Self {
        self.congestion_window = packets;
        self
    }

    /// Builder: set rate bounds.
    pub fn with_rates(mut self, min_bps: u64, max_bps: u64) -> Self {
        self.min_data_rate = min_bps;
        self.max_data_rate = max_bps;
        self
    }

    /// Builder: set the steady-state increase factor.
    pub fn with_rate_increase_factor(mut self, factor: f64) -> Self {
        self.rate_increase_factor = factor;
        self
    }

    /// Builder: set the average-rate horizon.
    pub fn with_avg_rate_horizon(mut self, horizon: Duration) -> Self {
        self.avg_rate_horizon = horizon;
        self
    }

    /// Builder: set member limit.
    pub fn with_max_members(mut self, members: usize) -> Self {
        self.max_members = members;
        self
    }

    /// Builder: set role.
    pub fn with_mrole(mut self, mrole: Mrole) -> Self {
        self.mrole = mrole;
        self
    }

    /// Builder: set mode.
    pub fn with_mode(mut self, mode: TransportMode) -> Self {
        self.mode = mode;
        self
    }

    /// Builder: set pruning policy.
    pub fn with_pruning(mut self, decentralized: bool, window: f64) -> Self {
        self.decentralized_pruning = decentralized;
        self.pruning_window = window;
        self
    }

    /// Builder: set the consecutive-congestion threshold.
    pub fn with_max_consecutive_congestion_count(mut self, count: u32) -> Self {
        self.max_consecutive_congestion_count = count;
        self
    }

    /// Builder: set cache sizes.
    pub fn with_cache_sizes(mut self, fifo_capacity: usize, data_cache_size: usize) -> Self {
        self.cache_capacity = fifo_capacity;
        self.data_cache_size = data_cache_size;
        self
    }

    /// Builder: set maximum packet size.
    pub fn with_max_packet_size(mut self, bytes: u32) -> Self {
        self.max_packet_size = bytes;
        self
    }

    /// Largest congestion window the rate controller may grow to.
    pub fn max_congestion_window(&self) -> u32 {
        self.ack_window
            .saturating_mul(self.max_congestion_window_multiple)
    }

    /// Validate the profile.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ack_window == 0 {
            return Err(ConfigError::InvalidRange("ack_window must be > 0"));
        }
        if self.ack_window > u32::from(u16::MAX) {
            return Err(ConfigError::InvalidRange("ack_window must fit in 16 bits"));
        }
        if self.congestion_window < self.ack_window {
            return Err(ConfigError::InvalidRange(
                "congestion_window must be >= ack_window",
            ));
        }
        if !(MIN_CONGESTION_WINDOW_MULTIPLE..=MAX_CONGESTION_WINDOW_MULTIPLE)
            .contains(&self.max_congestion_window_multiple)
        {
            return Err(ConfigError::InvalidRange(
                "max_congestion_window_multiple must be in [2, 5]",
            ));
        }
        if self.min_data_rate == 0 {
            return Err(ConfigError::InvalidRange("min_data_rate must be > 0"));
        }
        if self.min_data_rate > self.max_data_rate {
            return Err(ConfigError::InvalidRange("min_data_rate > max_data_rate"));
        }
        if self.rate_increase_factor <= 0.0 || self.rate_increase_factor > 1.0 {
            return Err(ConfigError::InvalidRange(
                "rate_increase_factor must be in (0, 1]",
            ));
        }
        if !(1.0..=5.0).contains(&self.pruning_window) {
            return Err(ConfigError::InvalidRange("pruning_window must be in [1, 5]"));
        }
        if self.max_members == 0 {
            return Err(ConfigError::InvalidRange("max_members must be > 0"));
        }
        if self.max_packet_size == 0 {
            return Err(ConfigError::InvalidRange("max_packet_size must be > 0"));
        }
        if self.data_cache_size == 0 {
            return Err(ConfigError::InvalidRange("data_cache_size must be > 0"));
        }
        Ok(())
    }
}

/// Configuration validation error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid range for a parameter.
    InvalidRange(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidRange(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_default() {
        let p = TransportProfile::default();
        assert_eq!(p.ack_window, 32);
        assert_eq!(p.congestion_window, 64);
        assert_eq!(p.max_members, 32);
        assert_eq!(p.max_packet_size, 1454);
        assert_eq!(p.min_data_rate, 1_000);
        assert_eq!(p.max_data_rate, 64_000);
        assert_eq!(p.pruning_window, 1.5);
        assert!(!p.decentralized_pruning);
        assert_eq!(p.mrole, Mrole::MemberReluctantHead);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_sender_profile() {
        let p = TransportProfile::sender();
        assert!(p.mode.is_sender());
        assert!(!TransportMode::ReceiveOnly.is_sender());
    }

    #[test]
    fn test_builder() {
        let p = TransportProfile::new()
            .with_ack_window(16)
            .with_rates(2_000, 10_000)
            .with_pruning(true, 2.0)
            .with_cache_sizes(100, 600);
        assert_eq!(p.ack_window, 16);
        assert_eq!(p.congestion_window, 32);
        assert_eq!(p.max_congestion_window(), 80);
        assert!(p.decentralized_pruning);
        assert_eq!(p.cache_capacity, 100);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_ranges() {
        let bad = TransportProfile::new().with_rates(5_000, 1_000);
        assert_eq!(
            bad.validate(),
            Err(ConfigError::InvalidRange("min_data_rate > max_data_rate"))
        );

        let bad = TransportProfile::new().with_pruning(true, 0.5);
        assert!(bad.validate().is_err());

        let bad = TransportProfile::new().with_congestion_window(8);
        assert!(bad.validate().is_err());

        let mut bad = TransportProfile::new();
        bad.max_congestion_window_multiple = 6;
        assert!(bad.validate().is_err());

        let bad = TransportProfile::new().with_ack_window(0);
        assert!(bad.validate().is_err());
    }
}
