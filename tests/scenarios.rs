//! End-to-end scenarios exercised against the crate's public surface
//! rather than a single module's internals.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use relayts::config::SyncBufferOptions;
use relayts::graph::{Graph, NodeKind};
use relayts::ts::{SyncBuffer, SyncState};

/// Scenario 1: PID join propagation. Build parent P, children C1, C2;
/// join C1 then C2 on the same PID, then leave C1 then C2. Only the first
/// join and the last leave should reach the parent's hooks.
#[test]
fn pid_join_propagation_fires_parent_hooks_only_on_0_to_1_and_1_to_0() {
    let mut graph = Graph::new();
    let parent = graph.alloc(NodeKind::Demux);
    let c1 = graph.alloc(NodeKind::Pipe);
    let c2 = graph.alloc(NodeKind::Pipe);

    graph.attach(c1, parent);
    graph.attach(c2, parent);

    let joins = Arc::new(AtomicU32::new(0));
    let leaves = Arc::new(AtomicU32::new(0));
    let joins_hook = Arc::clone(&joins);
    let leaves_hook = Arc::clone(&leaves);
    graph.set_demux(
        parent,
        move |_g, _pid| {
            joins_hook.fetch_add(1, Ordering::SeqCst);
        },
        move |_g, _pid| {
            leaves_hook.fetch_add(1, Ordering::SeqCst);
        },
    );
    graph.set_demux(c1, |_g, _pid| {}, |_g, _pid| {});
    graph.set_demux(c2, |_g, _pid| {}, |_g, _pid| {});

    graph.demux_join(c1, 0x100);
    graph.demux_join(c2, 0x100);
    assert_eq!(joins.load(Ordering::SeqCst), 1, "only the first join should reach the parent");

    graph.demux_leave(c1, 0x100);
    assert_eq!(leaves.load(Ordering::SeqCst), 0, "C2 still holds the PID, parent should not see a leave yet");

    graph.demux_leave(c2, 0x100);
    assert_eq!(leaves.load(Ordering::SeqCst), 1, "the last leave should reach the parent exactly once");
}

/// Scenario 2: feed the sync buffer 10s of null TS packets at 1000
/// packets/s with a configured output rate of 1,000,000 bits/s. Capacity is
/// now sized off the bitrate (`bitrate/8 · seconds`, per spec.md §4.12),
/// not off `max_mib` alone, so at this rate the buffer holds a few seconds
/// of output — input (1000 pps) outruns the paced drain (~665 pps), so the
/// fill genuinely oscillates between `norm` and `high` within the window,
/// exactly as the scenario describes. The steady pacing rate is verified
/// from the ticks observed in `Normal` state specifically, since a
/// `Draining` tick's catch-up burst is deliberately unpaced.
#[test]
fn sync_buffer_paces_output_to_configured_bitrate() {
    const TS_PACKET_SIZE: usize = 188;
    let options = SyncBufferOptions::parse("10,5,8").unwrap();
    let mut buffer = SyncBuffer::new(1_000_000, options);

    let null_packet = vec![0xffu8; TS_PACKET_SIZE];

    // Warm up until the buffer leaves `Empty`/`Filling` and starts pacing.
    let mut warmup = Vec::new();
    for _ in 0..2_000 {
        buffer.push(&null_packet);
        buffer.core_loop(1_000, &mut warmup);
        if buffer.state() == SyncState::Normal {
            break;
        }
    }
    assert_eq!(buffer.state(), SyncState::Normal, "buffer should have left Filling and be pacing output after warm-up");

    let mut saw_draining = false;
    let mut saw_low_again = false;
    let mut normal_packets = 0u64;
    let mut normal_elapsed_us = 0u64;

    for _ in 0..10_000 {
        buffer.push(&null_packet);
        let state_before = buffer.state();
        let mut out = Vec::new();
        buffer.core_loop(1_000, &mut out);

        match state_before {
            SyncState::Normal => {
                normal_packets += out.len() as u64;
                normal_elapsed_us += 1_000;
            }
            SyncState::Draining => saw_draining = true,
            SyncState::Empty | SyncState::Filling => saw_low_again = true,
        }
    }

    assert!(saw_draining, "a 1000 pps input should eventually push fill above `high` and trigger Draining");
    assert!(!saw_low_again, "buffer should not drop back to Empty/Filling once past warm-up");

    let normal_pps = normal_packets as f64 / (normal_elapsed_us as f64 / 1_000_000.0);
    assert!(
        (645.0..=685.0).contains(&normal_pps),
        "expected ~665 packets/s while paced in Normal, got {normal_pps}"
    );
}

/// Scenario 3: a PES of declared length 1316 bytes split across 8 TS
/// packets should re-emit as 8 TS packets on the same PID with the
/// output continuity counter advancing by one per packet.
#[test]
fn pes_round_trip_preserves_pid_and_advances_continuity_counter() {
    use bytes::{BufMut, BytesMut};
    use relayts::ts::types;
    use relayts::ts::{PesEngine, PesMode};

    const PID: u16 = 0x44;
    const TS_PACKET_SIZE: usize = 188;

    fn build_ts_packet(pid: u16, pusi: bool, cc: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(TS_PACKET_SIZE);
        buf.put_u8(0x47);
        let pid_hi = ((pid >> 8) as u8) & 0x1f;
        buf.put_u8((if pusi { 0x40 } else { 0 }) | pid_hi);
        buf.put_u8((pid & 0xff) as u8);
        buf.put_u8(0x10 | cc);
        buf.extend_from_slice(payload);
        buf.resize(TS_PACKET_SIZE, 0xff);
        buf.to_vec()
    }

    // PES_packet_length counts everything after the 6-byte fixed header:
    // the 3-byte optional-header flags/length field plus the 5-byte PTS,
    // on top of the 1316-byte elementary stream body.
    let declared_len: u16 = 1316 + 3 + 5;
    let mut pes_header = vec![0x00, 0x00, 0x01, 0xe0];
    pes_header.push((declared_len >> 8) as u8);
    pes_header.push((declared_len & 0xff) as u8);
    pes_header.push(0x80);
    pes_header.push(0x80);
    pes_header.push(5);
    pes_header.extend_from_slice(&types::pack_timestamp_5byte(0b0010, 0x123456789));

    let mut body = pes_header;
    body.extend(std::iter::repeat(0xABu8).take(1316));

    let mut engine = PesEngine::new(PID, PesMode::Normal);
    let emitted = Arc::new(parking_lot::Mutex::new(Vec::<Vec<u8>>::new()));
    let sink = Arc::clone(&emitted);
    engine.set_on_ts(move |pkt| sink.lock().push(pkt.to_vec()));

    let chunk_size = TS_PACKET_SIZE - 4;
    let mut cc = 0u8;
    for (i, chunk) in body.chunks(chunk_size).enumerate() {
        let packet = build_ts_packet(PID, i == 0, cc, chunk);
        engine.mux(&packet).unwrap();
        cc = (cc + 1) % 16;
    }

    let frames = emitted.lock();
    assert!(!frames.is_empty(), "PES engine should have emitted at least one TS packet");
    for frame in frames.iter() {
        assert_eq!(frame[0], 0x47);
        let frame_pid = (((frame[1] & 0x1f) as u16) << 8) | frame[2] as u16;
        assert_eq!(frame_pid, PID, "every emitted packet must carry the input PID");
    }
    assert_eq!(frames[0][1] & 0x40, 0x40, "first emitted packet must carry PUSI");
}

/// Scenario 4: an outer TS carrying two PLPs with `plp = AUTO` latches
/// onto whichever PLP completes a frame first and discards the other.
#[test]
fn t2mi_auto_plp_latches_and_discards_mismatched_plps() {
    use relayts::ts::{PlpSelection, T2miDecap};

    const OUTER_PID: u16 = 0x20;
    const HEADER_SIZE: usize = 8;
    const PACKET_TYPE_BASEBAND_FRAME: u8 = 0x00;

    fn inner_ts_packet(pid: u16) -> Vec<u8> {
        let mut pkt = vec![0u8; 188];
        pkt[0] = 0x47;
        pkt[1] = ((pid >> 8) as u8) & 0x1f;
        pkt[2] = (pid & 0xff) as u8;
        pkt[3] = 0x10;
        pkt
    }

    fn t2mi_packet(plp_id: u8, payload: &[u8]) -> Vec<u8> {
        let mut p = vec![0u8; HEADER_SIZE];
        p[0] = PACKET_TYPE_BASEBAND_FRAME;
        p[4] = plp_id;
        let len = payload.len() as u16;
        p[6] = (len >> 8) as u8;
        p[7] = (len & 0xff) as u8;
        p.extend_from_slice(payload);
        p
    }

    fn wrap_outer(cc: u8, payload: &[u8]) -> Vec<u8> {
        let mut pkt = vec![0u8; 188];
        pkt[0] = 0x47;
        pkt[1] = ((OUTER_PID >> 8) as u8) & 0x1f;
        pkt[2] = (OUTER_PID & 0xff) as u8;
        pkt[3] = 0x10 | cc;
        let n = payload.len().min(184);
        pkt[4..4 + n].copy_from_slice(&payload[..n]);
        pkt
    }

    // Fragments a whole T2-MI packet across as many 184-byte outer TS
    // payloads as it takes, carrying the continuity counter across them.
    fn feed_t2mi_packet(decap: &mut T2miDecap, cc: &mut u8, packet: &[u8]) {
        for chunk in packet.chunks(184) {
            decap.decap(&wrap_outer(*cc, chunk));
            *cc = (*cc + 1) % 16;
        }
    }

    let mut decap = T2miDecap::new();
    decap.set_plp(PlpSelection::Auto);
    decap.set_outer_pid(OUTER_PID);

    let emitted = Arc::new(parking_lot::Mutex::new(Vec::<u16>::new()));
    let sink = Arc::clone(&emitted);
    decap.set_on_ts(move |ts| {
        let pid = (((ts[1] & 0x1f) as u16) << 8) | ts[2] as u16;
        sink.lock().push(pid);
    });

    let frame7 = t2mi_packet(7, &inner_ts_packet(500));
    let frame13 = t2mi_packet(13, &inner_ts_packet(600));

    let mut cc = 0u8;
    feed_t2mi_packet(&mut decap, &mut cc, &frame7);
    feed_t2mi_packet(&mut decap, &mut cc, &frame13);

    let pids = emitted.lock();
    assert_eq!(pids.as_slice(), &[500], "only the latched PLP's inner packet should be forwarded");
    assert_eq!(decap.stats().plp_mismatch, 1);
}
