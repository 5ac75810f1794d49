// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-level error type.
//!
//! Expected per-event control flow (unknown sender, duplicate congestion
//! report, packet not produced yet) is reported through typed outcomes, not
//! through this enum. `Error` covers rejected operations and malformed input.

use std::net::SocketAddr;

use crate::config::ConfigError;

/// Errors returned by the TRAM core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Transport profile failed validation.
    Config(ConfigError),

    // ========================================================================
    // Membership Errors
    // ========================================================================
    /// No member id left in the membership mask; join rejected.
    MembershipFull,
    /// A member with this address is already attached.
    DuplicateMember(SocketAddr),

    // ========================================================================
    // Wire Errors
    // ========================================================================
    /// Body shorter than the fixed header.
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },
    /// ACK bitmap shorter than its declared bit length.
    MalformedAck {
        /// Declared bitmap length in bits.
        declared_bits: u16,
        /// Bitmap bytes actually present.
        bitmap_len: usize,
    },

    // ========================================================================
    // Queue Errors
    // ========================================================================
    /// Packet cache was terminated.
    Closed,
    /// Non-blocking operation found nothing to return (or no room).
    WouldBlock,

    // ========================================================================
    // Runtime Errors
    // ========================================================================
    /// A worker thread could not be started.
    ThreadSpawn(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // Configuration
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            // Membership
            Error::MembershipFull => write!(f, "Membership full: no member id available"),
            Error::DuplicateMember(addr) => write!(f, "Member {} already attached", addr),
            // Wire
            Error::Truncated { needed, available } => write!(
                f,
                "Truncated body: need {} bytes, have {}",
                needed, available
            ),
            Error::MalformedAck {
                declared_bits,
                bitmap_len,
            } => write!(
                f,
                "Malformed ACK: {} bits declared, {} bitmap bytes present",
                declared_bits, bitmap_len
            ),
            // Queue
            Error::Closed => write!(f, "Packet cache closed"),
            Error::WouldBlock => write!(f, "Operation would block"),
            // Runtime
            Error::ThreadSpawn(msg) => write!(f, "Failed to spawn thread: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

/// Convenient alias for results using the crate `Error` type.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_malformed_ack() {
        let e = Error::MalformedAck {
            declared_bits: 17,
            bitmap_len: 2,
        };
        assert_eq!(
            e.to_string(),
            "Malformed ACK: 17 bits declared, 2 bitmap bytes present"
        );
    }

    #[test]
    fn test_config_error_source() {
        use std::error::Error as _;

        let e: Error = ConfigError::InvalidRange("ack_window must be > 0").into();
        assert!(e.source().is_some());
        assert!(Error::Closed.source().is_none());
    }
}
