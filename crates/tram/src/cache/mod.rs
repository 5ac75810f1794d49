// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet storage.
//!
//! - [`PacketCache`]: two-lane blocking queue between protocol threads and
//!   the output dispatcher (normal FIFO lane + priority retransmit lane).
//! - [`DataCache`]: retransmission history of sent packets, purged as
//!   members acknowledge.
//! - [`DataPacket`] / [`Packet`]: the units both caches hold.

mod data_cache;
mod packet;
mod packet_cache;

pub use data_cache::{CacheEntry, DataCache};
pub use packet::{ControlPacket, DataPacket, Packet};
pub use packet_cache::{Direction, PacketCache};
