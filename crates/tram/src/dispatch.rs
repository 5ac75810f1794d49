// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dispatch threads.
//!
//! [`OutputDispatcher`] drains the outbound [`PacketCache`], hands packets to
//! a [`PacketSink`] and paces data at the rate the [`RateController`]
//! allows. [`InputDispatcher`] feeds raw ACK and congestion bodies received
//! from members into the [`AckProcessor`] and [`CongestionHandler`].
//!
//! Both run on dedicated named threads and stop when their [`CancelToken`]
//! is cancelled, at the latest one poll interval later.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};

use crate::ack::{AckProcessor, CongestionHandler};
use crate::cache::{DataPacket, Packet, PacketCache};
use crate::clock::current_time_ms;
use crate::error::{Error, Result};
use crate::membership::GroupTree;
use crate::rate::RateController;

/// Poll interval for cancellation checks.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Longest pause between two data packets.
pub const MAX_PACING_SLEEP: Duration = Duration::from_millis(1000);

/// Depth of the channel created by [`input_channel`].
pub const INPUT_CHANNEL_CAPACITY: usize = 1024;

/// Shared stop flag for dispatch threads.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create an uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder to stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Where the output thread writes packets (socket, test recorder...).
pub trait PacketSink: Send + 'static {
    fn send(&mut self, packet: &Packet) -> std::io::Result<()>;
}

/// Pause needed to send `bytes` at `rate` bytes per second, capped at
/// [`MAX_PACING_SLEEP`]. A zero rate yields no pause.
pub fn pacing_interval(bytes: usize, rate: u64) -> Duration {
    if rate == 0 {
        return Duration::ZERO;
    }
    let ms = (bytes as u64).saturating_mul(1000) / rate;
    Duration::from_millis(ms).min(MAX_PACING_SLEEP)
}

// ============================================================================
// Output
// ============================================================================

/// Counters for the output thread.
#[derive(Debug, Default)]
pub struct OutputStats {
    data_sent: AtomicU64,
    retransmissions_sent: AtomicU64,
    control_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_errors: AtomicU64,
}

/// Point-in-time copy of [`OutputStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutputStatsSnapshot {
    /// First transmissions sent.
    pub data_sent: u64,
    /// Repairs sent.
    pub retransmissions_sent: u64,
    /// Control packets sent.
    pub control_sent: u64,
    /// Payload bytes sent.
    pub bytes_sent: u64,
    /// Sends the sink rejected.
    pub send_errors: u64,
}

impl OutputStats {
    /// Take a point-in-time copy of the counters.
    pub fn snapshot(&self) -> OutputStatsSnapshot {
        OutputStatsSnapshot {
            data_sent: self.data_sent.load(Ordering::Relaxed),
            retransmissions_sent: self.retransmissions_sent.load(Ordering::Relaxed),
            control_sent: self.control_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

/// Spaces data packets out so the long-run rate matches the target.
///
/// Oversleeping on one packet is credited to the next, up to one interval.
struct Pacer {
    next_send: Instant,
}

impl Pacer {
    fn new() -> Self {
        Self {
            next_send: Instant::now(),
        }
    }

    fn pace(&mut self, interval: Duration, cancel: &CancelToken) {
        if interval.is_zero() {
            return;
        }
        let now = Instant::now();
        let base = self.next_send.max(now.checked_sub(interval).unwrap_or(now));
        self.next_send = base + interval;
        loop {
            let now = Instant::now();
            if now >= self.next_send || cancel.is_cancelled() {
                return;
            }
            std::thread::sleep((self.next_send - now).min(POLL_INTERVAL));
        }
    }
}

struct OutputWorker<S> {
    packet_cache: Arc<PacketCache>,
    group: Arc<GroupTree>,
    rate: Arc<RateController>,
    sink: S,
    cancel: CancelToken,
    stats: Arc<OutputStats>,
    pacer: Pacer,
}

impl<S: PacketSink> OutputWorker<S> {
    fn run(mut self) {
        log::debug!("[OutputDispatcher] thread started");
        while !self.cancel.is_cancelled() {
            match self.packet_cache.get_timeout(POLL_INTERVAL) {
                Ok(Some(packet)) => self.dispatch(packet),
                Ok(None) => {}
                Err(_) => {
                    log::debug!("[OutputDispatcher] packet cache closed");
                    break;
                }
            }
        }
        log::debug!("[OutputDispatcher] thread stopped");
    }

    fn dispatch(&mut self, packet: Packet) {
        match &packet {
            Packet::Control(_) => {
                if self.send(&packet) {
                    self.stats.control_sent.fetch_add(1, Ordering::Relaxed);
                }
            }
            Packet::Data(pk) => {
                let pk = Arc::clone(pk);
                self.remember(&pk);
                if !self.send(&packet) {
                    pk.clear_transmit_pending();
                    return;
                }
                self.stamp(&pk, false);
                self.stats.data_sent.fetch_add(1, Ordering::Relaxed);
                self.rate.adjust_rate(&pk);
                let rate = self.rate.actual_data_rate(pk.seq());
                self.pacer.pace(pacing_interval(pk.len(), rate), &self.cancel);
            }
            Packet::Retransmit(pk) => {
                let pk = Arc::clone(pk);
                if !self.send(&packet) {
                    pk.clear_transmit_pending();
                    return;
                }
                self.stamp(&pk, true);
                self.stats.retransmissions_sent.fetch_add(1, Ordering::Relaxed);
                let rate = self.rate.open_window_data_rate();
                self.pacer.pace(pacing_interval(pk.len(), rate), &self.cancel);
            }
        }
    }

    /// Record a first transmission in the retransmission history.
    fn remember(&self, pk: &Arc<DataPacket>) {
        self.group.window().advance_last_known(pk.seq());
        let Some(cache) = self.group.data_cache() else {
            return;
        };
        if cache.insert(Arc::clone(pk), true) {
            if let Some(purged) = self.group.purge_data_cache(None) {
                log::debug!(
                    "[OutputDispatcher] history at high water, purged {} packets",
                    purged
                );
            }
        }
    }

    fn send(&mut self, packet: &Packet) -> bool {
        match self.sink.send(packet) {
            Ok(()) => {
                self.stats
                    .bytes_sent
                    .fetch_add(packet.byte_len() as u64, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("[OutputDispatcher] send failed for {:?}: {}", packet.seq(), e);
                false
            }
        }
    }

    fn stamp(&self, pk: &DataPacket, retransmission: bool) {
        pk.mark_transmitted(
            current_time_ms(),
            self.rate.open_window_data_rate(),
            retransmission,
        );
        self.rate.record_bytes_transferred(pk.len() as u64);
    }
}

/// Output thread handle.
///
/// Dropping it cancels the thread and joins it.
pub struct OutputDispatcher {
    cancel: CancelToken,
    stats: Arc<OutputStats>,
    handle: Option<JoinHandle<()>>,
}

impl OutputDispatcher {
    /// Start the output thread ("tram-output").
    pub fn spawn<S: PacketSink>(
        packet_cache: Arc<PacketCache>,
        group: Arc<GroupTree>,
        rate: Arc<RateController>,
        sink: S,
    ) -> Result<Self> {
        let cancel = CancelToken::new();
        let stats = Arc::new(OutputStats::default());
        let worker = OutputWorker {
            packet_cache,
            group,
            rate,
            sink,
            cancel: cancel.clone(),
            stats: Arc::clone(&stats),
            pacer: Pacer::new(),
        };
        let handle = std::thread::Builder::new()
            .name("tram-output".to_string())
            .spawn(move || worker.run())
            .map_err(|e| Error::ThreadSpawn(e.to_string()))?;
        Ok(Self {
            cancel,
            stats,
            handle: Some(handle),
        })
    }

    /// Get a token that stops the worker.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Get the output counters.
    pub fn stats(&self) -> OutputStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop the thread and wait for it.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("[OutputDispatcher::shutdown] output thread panicked");
            }
        }
    }
}

impl Drop for OutputDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Input
// ============================================================================

/// Raw feedback body received from a member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundControl {
    Ack {
        from: SocketAddr,
        flags: u8,
        body: Vec<u8>,
    },
    Congestion {
        from: SocketAddr,
        flags: u8,
        body: Vec<u8>,
    },
}

/// Bounded channel feeding an [`InputDispatcher`].
pub fn input_channel() -> (Sender<InboundControl>, Receiver<InboundControl>) {
    crossbeam::channel::bounded(INPUT_CHANNEL_CAPACITY)
}

/// Input thread handle.
pub struct InputDispatcher {
    cancel: CancelToken,
    handled: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl InputDispatcher {
    /// Start the input thread ("tram-input").
    ///
    /// The thread exits when cancelled or when every sender is dropped.
    pub fn spawn(
        rx: Receiver<InboundControl>,
        acks: Arc<AckProcessor>,
        congestion: Arc<CongestionHandler>,
    ) -> Result<Self> {
        let cancel = CancelToken::new();
        let handled = Arc::new(AtomicU64::new(0));
        let cancel_worker = cancel.clone();
        let handled_worker = Arc::clone(&handled);
        let handle = std::thread::Builder::new()
            .name("tram-input".to_string())
            .spawn(move || {
                log::debug!("[InputDispatcher] thread started");
                while !cancel_worker.is_cancelled() {
                    match rx.recv_timeout(POLL_INTERVAL) {
                        Ok(msg) => {
                            Self::handle(&acks, &congestion, msg);
                            handled_worker.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("[InputDispatcher] thread stopped");
            })
            .map_err(|e| Error::ThreadSpawn(e.to_string()))?;
        Ok(Self {
            cancel,
            handled,
            handle: Some(handle),
        })
    }

    fn handle(acks: &AckProcessor, congestion: &CongestionHandler, msg: InboundControl) {
        match msg {
            InboundControl::Ack { from, flags, body } => {
                let outcome = acks.receive_ack_packet(from, flags, &body);
                log::trace!("[InputDispatcher] ACK from {}: {:?}", from, outcome);
            }
            InboundControl::Congestion { from, flags, body } => {
                let outcome = congestion.receive_congestion_packet(from, flags, &body);
                log::trace!("[InputDispatcher] congestion from {}: {:?}", from, outcome);
            }
        }
    }

    /// Messages processed so far.
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    /// Get a token that stops the worker.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Cancel the worker and wait for it to exit.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("[InputDispatcher::shutdown] input thread panicked");
            }
        }
    }
}

impl Drop for InputDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
