// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ACK Processing Benchmark
//!
//! Measures the cost of one ACK through the processor:
//! - plain ACK (ceiling and last-acked update only)
//! - NACK with a sparse bitmap (repair lookups, all suppressed as pending)
//! - ACK body decode

use std::net::SocketAddr;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tram::{
    control_channel, AckFlags, AckMessage, AckProcessor, DataCache, DataPacket, GroupTree, Member,
    Mrole, PacketCache, RateController, SendWindow, SeqNum, TransportProfile,
};

const MEMBERS: u16 = 32;

fn setup() -> (AckProcessor, Vec<SocketAddr>) {
    let profile = TransportProfile::sender();
    let window = Arc::new(SendWindow::new(profile.congestion_window));
    let history = Arc::new(DataCache::new(profile.data_cache_size, profile.ack_window));
    let group = Arc::new(
        GroupTree::new(profile.max_members, Mrole::MemberEagerHead, window)
            .with_data_cache(Arc::clone(&history)),
    );
    for seq in 1..=1_000 {
        let pk = Arc::new(DataPacket::new(SeqNum::new(seq), vec![0; 1024]));
        history.insert(pk, true);
        group.window().advance_last_known(SeqNum::new(seq));
    }
    let members: Vec<SocketAddr> = (0..MEMBERS)
        .map(|i| SocketAddr::from(([10, 30, 0, 1], 6000 + i)))
        .collect();
    for &addr in &members {
        group.add_member(Member::new(addr)).expect("join");
    }
    let rate = Arc::new(RateController::new(&profile, Arc::clone(&group)).expect("profile"));
    let (sink, _events) = control_channel();
    let processor = AckProcessor::new(
        &profile,
        group,
        history,
        Arc::new(PacketCache::outbound(0)),
        rate,
        sink,
    )
    .expect("valid profile");
    (processor, members)
}

fn bench_plain_ack(c: &mut Criterion) {
    let (processor, members) = setup();
    let mut base = 0u32;
    c.bench_function("ack_plain", |b| {
        b.iter(|| {
            base = base.wrapping_add(1) % 1_000;
            let ack = AckMessage::new(AckFlags::ACK, SeqNum::new(base))
                .with_highest_allowed(SeqNum::new(base + 64));
            let from = members[(base % u32::from(MEMBERS)) as usize];
            black_box(processor.receive_ack(from, &ack))
        });
    });
}

fn bench_sparse_nack(c: &mut Criterion) {
    let (processor, members) = setup();
    // first pass queues the repairs; later passes measure the suppressed path
    let ack = AckMessage::new(AckFlags::ACK, SeqNum::new(500)).with_missing(&[0, 7, 19, 31]);
    c.bench_function("ack_sparse_nack_suppressed", |b| {
        b.iter(|| black_box(processor.receive_ack(members[0], black_box(&ack))));
    });
}

fn bench_decode(c: &mut Criterion) {
    let ack = AckMessage::new(AckFlags::ACK | AckFlags::SUBTREE_FLOW_CONTROL_INFO, SeqNum::new(77))
        .with_missing(&[0, 3, 8, 60, 120])
        .with_flow_control_info(12);
    let flags = ack.flags;
    let body = ack.encode();
    c.bench_function("ack_decode", |b| {
        b.iter(|| AckMessage::decode(flags, black_box(&body)).expect("valid body"));
    });
}

criterion_group!(benches, bench_plain_ack, bench_sparse_nack, bench_decode);
criterion_main!(benches);
