//! # T2-MI De-Encapsulator (C13)
//!
//! Consumes an outer MPEG-TS carrying a DVB-T2 Modulator Interface stream
//! and emits the inner TS packets carried in one Physical Layer Pipe
//! (PLP). The outer PID (or a program number to resolve one from PAT/PMT)
//! and PLP selection are configured up front; PLP `AUTO` latches onto the
//! first PLP ID observed and keeps it even if that PLP later disappears
//! (see the design notes' "latch-once" decision for `auto PLP`).
//!
//! T2-MI packet header layout used here: `packet_type`(1) `packet_count`(1)
//! `frame_idx`(2, superframe/frame index, carried but unused downstream)
//! `plp_id`(1) `reserved`(1) `payload_len`(2, big-endian) followed by
//! `payload_len` bytes — for `BASEBAND_FRAME` packets, a run of 188-byte
//! aligned inner TS packets.

use bytes::{Buf, BytesMut};
use log::debug;

use crate::ts::types::{PAT, PMT, TS_PACKET_SIZE};

/// Auto PLP selection marker.
pub const PLP_ID_AUTO: u16 = 0x100;

const T2MI_HEADER_SIZE: usize = 8;
const PACKET_TYPE_BASEBAND_FRAME: u8 = 0x00;

/// Stream type used to locate the T2-MI elementary stream in a PMT when
/// only a program number is configured, mirroring the private-stream
/// convention the original decapsulator observes in practice.
pub const STREAM_TYPE_T2MI: u8 = 0x06;

/// Which PLP a [`T2miDecap`] is configured to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlpSelection {
    /// Adopt the first PLP ID observed and keep it from then on.
    Auto,
    /// Only process frames carrying this PLP ID.
    Fixed(u8),
}

/// Counters tracking de-encapsulation activity.
#[derive(Debug, Clone, Copy, Default)]
pub struct T2miStats {
    /// Complete T2-MI packets parsed.
    pub packets: u64,
    /// Malformed or truncated frames dropped.
    pub malformed: u64,
    /// Baseband frames skipped because their PLP didn't match the
    /// selected one.
    pub plp_mismatch: u64,
    /// Inner TS packets emitted.
    pub emitted: u64,
}

/// De-encapsulation state for one outer T2-MI stream.
pub struct T2miDecap {
    outer_pid: Option<u16>,
    plp: PlpSelection,
    latched_plp: Option<u8>,

    last_cc: Option<u8>,
    buf: BytesMut,

    stats: T2miStats,

    on_ts: Option<Box<dyn FnMut(&[u8]) + Send>>,
    on_join: Option<Box<dyn FnMut(u16) + Send>>,
    on_leave: Option<Box<dyn FnMut(u16) + Send>>,
}

impl Default for T2miDecap {
    fn default() -> Self {
        Self::new()
    }
}

impl T2miDecap {
    /// Creates a decapsulator with no outer PID configured yet.
    pub fn new() -> Self {
        Self {
            outer_pid: None,
            plp: PlpSelection::Auto,
            latched_plp: None,
            last_cc: None,
            buf: BytesMut::new(),
            stats: T2miStats::default(),
            on_ts: None,
            on_join: None,
            on_leave: None,
        }
    }

    /// Sets the PLP selection policy.
    pub fn set_plp(&mut self, plp: PlpSelection) {
        self.plp = plp;
        self.latched_plp = match plp {
            PlpSelection::Fixed(id) => Some(id),
            PlpSelection::Auto => None,
        };
    }

    /// Registers the callback invoked with each emitted inner TS packet.
    pub fn set_on_ts(&mut self, callback: impl FnMut(&[u8]) + Send + 'static) {
        self.on_ts = Some(Box::new(callback));
    }

    /// Registers join/leave callbacks, invoked when the outer PID is
    /// configured (or changes), to propagate PID interest to the parent
    /// graph node.
    pub fn set_demux_hooks(
        &mut self,
        on_join: impl FnMut(u16) + Send + 'static,
        on_leave: impl FnMut(u16) + Send + 'static,
    ) {
        self.on_join = Some(Box::new(on_join));
        self.on_leave = Some(Box::new(on_leave));
    }

    /// Directly configures the outer PID to consume, firing the join
    /// callback for it (and the leave callback for any previously
    /// configured PID).
    pub fn set_outer_pid(&mut self, pid: u16) {
        if let Some(old) = self.outer_pid {
            if old != pid {
                if let Some(cb) = self.on_leave.as_mut() {
                    cb(old);
                }
            } else {
                return;
            }
        }
        self.outer_pid = Some(pid);
        if let Some(cb) = self.on_join.as_mut() {
            cb(pid);
        }
    }

    /// Resolves the outer PID from a program number by locating its PMT
    /// entry's first elementary stream of type [`STREAM_TYPE_T2MI`].
    pub fn resolve_payload_pid(&mut self, pnr: u16, pat: &PAT, pmt_for: impl Fn(u16) -> Option<PMT>) -> bool {
        let Some(entry) = pat.entries.iter().find(|e| e.program_number == pnr) else {
            return false;
        };
        let Some(pmt) = pmt_for(entry.program_map_pid) else {
            return false;
        };
        let Some(stream) = pmt
            .elementary_stream_infos
            .iter()
            .find(|info| info.stream_type == STREAM_TYPE_T2MI)
        else {
            return false;
        };

        self.set_outer_pid(stream.elementary_pid);
        true
    }

    /// Activity counters.
    pub fn stats(&self) -> T2miStats {
        self.stats
    }

    /// Feeds one outer TS packet. Packets on any PID other than the
    /// configured outer PID are ignored.
    pub fn decap(&mut self, ts: &[u8]) {
        if ts.len() != TS_PACKET_SIZE || ts[0] != 0x47 {
            return;
        }

        let pid = (((ts[1] & 0x1f) as u16) << 8) | ts[2] as u16;
        if Some(pid) != self.outer_pid {
            return;
        }

        let cc = ts[3] & 0x0f;
        let has_payload = (ts[3] & 0x10) != 0;
        let has_af = (ts[3] & 0x20) != 0;

        if let Some(last) = self.last_cc {
            if has_payload && cc != (last + 1) & 0x0f {
                debug!("t2mi: cc discontinuity on outer pid {}, resetting buffer", pid);
                self.buf.clear();
            }
        }
        self.last_cc = Some(cc);

        if !has_payload {
            return;
        }

        let af_len = if has_af { ts[4] as usize + 1 } else { 0 };
        let offset = 4 + af_len;
        if offset > ts.len() {
            return;
        }

        self.buf.extend_from_slice(&ts[offset..]);
        self.drain_packets();
    }

    fn drain_packets(&mut self) {
        loop {
            if self.buf.len() < T2MI_HEADER_SIZE {
                return;
            }

            let packet_type = self.buf[0];
            let plp_id = self.buf[4];
            let payload_len = (((self.buf[6] as usize) << 8) | self.buf[7] as usize).min(64 * 1024);

            if self.buf.len() < T2MI_HEADER_SIZE + payload_len {
                return; // wait for more data
            }

            self.stats.packets += 1;

            if packet_type == PACKET_TYPE_BASEBAND_FRAME {
                self.handle_baseband_frame(plp_id, payload_len);
            }

            self.buf.advance(T2MI_HEADER_SIZE + payload_len);
        }
    }

    fn handle_baseband_frame(&mut self, plp_id: u8, payload_len: usize) {
        match self.plp {
            PlpSelection::Auto if self.latched_plp.is_none() => {
                debug!("t2mi: auto-latching plp {}", plp_id);
                self.latched_plp = Some(plp_id);
            }
            _ => {}
        }

        if self.latched_plp != Some(plp_id) {
            self.stats.plp_mismatch += 1;
            return;
        }

        let payload = &self.buf[T2MI_HEADER_SIZE..T2MI_HEADER_SIZE + payload_len];
        if payload.len() % TS_PACKET_SIZE != 0 {
            self.stats.malformed += 1;
        }

        for chunk in payload.chunks(TS_PACKET_SIZE) {
            if chunk.len() != TS_PACKET_SIZE || chunk[0] != 0x47 {
                self.stats.malformed += 1;
                continue;
            }
            if let Some(cb) = self.on_ts.as_mut() {
                cb(chunk);
            }
            self.stats.emitted += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t2mi_packet(packet_type: u8, plp_id: u8, payload: &[u8]) -> Vec<u8> {
        let mut p = vec![packet_type, 0, 0, 0, plp_id, 0];
        p.push((payload.len() >> 8) as u8);
        p.push((payload.len() & 0xff) as u8);
        p.extend_from_slice(payload);
        p
    }

    fn inner_ts_packet(pid: u16) -> Vec<u8> {
        let mut p = vec![0x47, (pid >> 8) as u8, (pid & 0xff) as u8, 0x10];
        p.resize(TS_PACKET_SIZE, 0xAB);
        p
    }

    fn wrap_outer(pid: u16, cc: u8, payload: &[u8]) -> Vec<u8> {
        let mut p = vec![0x47, 0x00 | (pid >> 8) as u8, (pid & 0xff) as u8, 0x10 | cc];
        p.extend_from_slice(payload);
        p.resize(TS_PACKET_SIZE, 0xff);
        p
    }

    #[test]
    fn auto_plp_latches_on_first_seen_and_drops_others() {
        let mut decap = T2miDecap::new();
        decap.set_outer_pid(100);
        decap.set_plp(PlpSelection::Auto);

        let emitted = std::sync::Arc::new(parking_lot::Mutex::new(Vec::<u16>::new()));
        let e2 = std::sync::Arc::clone(&emitted);
        decap.set_on_ts(move |pkt| {
            let pid = (((pkt[1] & 0x1f) as u16) << 8) | pkt[2] as u16;
            e2.lock().push(pid);
        });

        let frame_plp7 = t2mi_packet(PACKET_TYPE_BASEBAND_FRAME, 7, &inner_ts_packet(500));
        let frame_plp13 = t2mi_packet(PACKET_TYPE_BASEBAND_FRAME, 13, &inner_ts_packet(600));

        decap.decap(&wrap_outer(100, 0, &frame_plp7));
        decap.decap(&wrap_outer(100, 1, &frame_plp13));

        assert_eq!(emitted.lock().as_slice(), &[500]);
        assert_eq!(decap.stats().plp_mismatch, 1);
    }

    #[test]
    fn cc_discontinuity_resets_partial_buffer() {
        let mut decap = T2miDecap::new();
        decap.set_outer_pid(100);

        // Feed a header claiming a large payload, then skip a CC so the
        // partial packet should be discarded rather than misinterpreted.
        let mut partial_header = vec![PACKET_TYPE_BASEBAND_FRAME, 0, 0, 0, 7, 0, 0x01, 0x00];
        partial_header.extend(std::iter::repeat(0u8).take(20));

        decap.decap(&wrap_outer(100, 0, &partial_header));
        // Jump CC from 0 to 2, skipping 1: discontinuity.
        decap.decap(&wrap_outer(100, 2, &[0u8; 10]));

        assert!(decap.stats().packets == 0);
    }
}
