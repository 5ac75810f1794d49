// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control actions requested by ACK and congestion processing.
//!
//! Processing itself does no I/O; whatever has to go on the wire or reach
//! the membership layer is posted as a [`ControlEvent`] on a channel owned
//! by the embedding session.

use std::net::SocketAddr;

use crossbeam::channel::{Receiver, Sender, TrySendError};

use super::wire::CongestionMessage;
use crate::seq::SeqNum;

/// Action for the control thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    /// The group ceiling jumped; send an ACK upward without waiting.
    SendAckNow,
    /// Forward a congestion report to this node's head.
    ForwardCongestion(CongestionMessage),
    /// A member asked for a packet that is no longer cached.
    PacketUnavailable { member: SocketAddr, seq: SeqNum },
    /// Remove a member from the tree.
    PruneMember(SocketAddr),
}

/// Channel depth used by [`control_channel`].
pub const CONTROL_CHANNEL_CAPACITY: usize = 256;

/// Bounded channel for control events.
pub fn control_channel() -> (EventSink, Receiver<ControlEvent>) {
    let (tx, rx) = crossbeam::channel::bounded(CONTROL_CHANNEL_CAPACITY);
    (EventSink { tx }, rx)
}

/// Sending side of the control channel.
///
/// Posting never blocks ACK processing: when the channel is full the event
/// is dropped and logged.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: Sender<ControlEvent>,
}

impl EventSink {
    /// Wrap the sending half of a control channel.
    pub fn new(tx: Sender<ControlEvent>) -> Self {
        Self { tx }
    }

    /// Post an event. Returns false if it was dropped.
    pub fn post(&self, event: ControlEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                log::warn!("[EventSink::post] control channel full, dropping {:?}", event);
                false
            }
            Err(TrySendError::Disconnected(event)) => {
                log::debug!("[EventSink::post] control channel closed, dropping {:?}", event);
                false
            }
        }
    }
}
