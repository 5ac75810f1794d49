// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wall-clock helper.
//!
//! Transmit timestamps are stored as milliseconds since the UNIX epoch so a
//! never-transmitted packet (timestamp 0) always reads as long ago.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since UNIX_EPOCH.
pub fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
