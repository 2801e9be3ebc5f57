//! # PES Engine (C11)
//!
//! Reassembles Packetized Elementary Stream packets from a sequence of TS
//! packets sharing one PID (`mux`), and re-packetizes a reassembled PES
//! back into TS packets with timing fields propagated (`demux`, driven
//! internally by `mux` as each PES completes or is force-flushed).
//!
//! This is a direct re-expression of `mpegts_pes_mux`/`pes_demux`: the
//! buffering, continuity-counter propagation, and adaptation-field/PES
//! header layout rules are unchanged, only the memory model differs (a
//! growable `Vec<u8>` capped at [`PES_MAX_BUFFER`] instead of a
//! fixed-size C array, and owned TS packets emitted through a callback
//! instead of written in place).

use crate::error::Result;
use crate::ts::parser::TSPacketParser;
use crate::ts::types::{self, TS_PACKET_SIZE};

/// Sentinel for "no timestamp present", distinguishable from any valid
/// 42-bit PCR or 33-bit PTS/DTS value.
pub const TS_NONE: u64 = u64::MAX;

/// Maximum PES reassembly buffer size; longer packets are truncated.
pub const PES_MAX_BUFFER: usize = 512 * 1024;

const TS_HEADER_SIZE: usize = 4;
const TS_BODY_SIZE: usize = TS_PACKET_SIZE - TS_HEADER_SIZE;
const PES_HEADER_SIZE: usize = 9; // start code(3) + stream id(1) + length(2) + flags(3)
const PES_HDR_BASIC: usize = 6;

/// Whether a [`PesEngine`] emits a TS packet as soon as one full 184-byte
/// body is buffered (`Fast`), or only once the whole PES is assembled
/// (`Normal`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PesMode {
    /// Wait for the complete PES before re-packetizing.
    Normal,
    /// Emit TS packets as soon as a full body's worth of data is ready.
    /// Guarantees for variable-length (video) streams under this mode are
    /// asymmetric and best-effort; see the module-level design notes.
    Fast,
}

/// Counters tracking PES engine activity, exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct PesStats {
    /// TS packets successfully emitted.
    pub sent: u64,
    /// Incoming TS packets dropped (no PES in progress to append to).
    pub dropped: u64,
    /// PES packets truncated for exceeding [`PES_MAX_BUFFER`].
    pub truncated: u64,
}

/// Per-PID PES reassembly/re-packetization state.
pub struct PesEngine {
    pid: u16,
    mode: PesMode,
    parser: TSPacketParser,

    i_cc: u8,
    o_cc: u8,
    expect_size: usize,

    buf: Vec<u8>,
    buf_read: usize,
    buf_write: usize,

    pcr: u64,
    pts: u64,
    dts: u64,
    key: bool,
    stream_id: u8,

    stats: PesStats,

    on_ts: Option<Box<dyn FnMut(&[u8]) + Send>>,
}

impl PesEngine {
    /// Creates a new PES engine for `pid` in the given mode.
    pub fn new(pid: u16, mode: PesMode) -> Self {
        Self {
            pid,
            mode,
            parser: TSPacketParser::new(),
            i_cc: 0,
            o_cc: 15, // wraps to 0 on first emit
            expect_size: 0,
            buf: Vec::new(),
            buf_read: 0,
            buf_write: 0,
            pcr: TS_NONE,
            pts: TS_NONE,
            dts: TS_NONE,
            key: false,
            stream_id: 0,
            stats: PesStats::default(),
            on_ts: None,
        }
    }

    /// Registers the callback invoked with each emitted 188-byte TS packet.
    pub fn set_on_ts(&mut self, callback: impl FnMut(&[u8]) + Send + 'static) {
        self.on_ts = Some(Box::new(callback));
    }

    /// Activity counters.
    pub fn stats(&self) -> PesStats {
        self.stats
    }

    /// Feeds one incoming TS packet for this PID into the reassembler.
    /// Returns `false` if the packet had no usable payload (caller should
    /// treat this as a no-op, not an error).
    pub fn mux(&mut self, ts: &[u8]) -> Result<bool> {
        let header = self.parser.parse_header(ts)?;
        let af = self.parser.parse_adaptation_field(ts, TS_HEADER_SIZE)?;

        let af_len = af.as_ref().map(|f| f.length + 1).unwrap_or(0);
        let payload_offset = TS_HEADER_SIZE + af_len;
        if payload_offset > ts.len() || !header.contains_payload {
            return Ok(false);
        }

        let mut payload = &ts[payload_offset..];
        if payload.len() > TS_BODY_SIZE {
            return Ok(false);
        }

        let cc = header.continuity_counter;
        if self.expect_size > 0 && cc != (self.i_cc + 1) & 0x0f {
            self.o_cc = (self.o_cc + 1) & 0x0f;
        }
        self.i_cc = cc;

        if header.payload_unit_start {
            if self.expect_size > 0 && self.buf_read < self.buf_write {
                self.demux(false);
            }

            self.expect_size = 0;
            self.buf_write = 0;
            self.buf_read = 0;
            self.pcr = TS_NONE;
            self.pts = TS_NONE;
            self.dts = TS_NONE;

            if payload.len() < PES_HEADER_SIZE {
                return Ok(false);
            }
            let start_code = ((payload[0] as u32) << 16) | ((payload[1] as u32) << 8) | payload[2] as u32;
            if start_code != 0x000001 {
                return Ok(false);
            }

            self.key = af.as_ref().is_some_and(|f| f.random_access);
            let declared_len = ((payload[4] as usize) << 8) | payload[5] as usize;
            self.stream_id = payload[3];

            let flags = payload[7];
            let pts_flag = (flags & 0x80) != 0;
            let dts_flag = (flags & 0x40) != 0;
            let ext_hdrlen = payload[8] as usize;
            let hdrlen = PES_HEADER_SIZE + ext_hdrlen;

            if payload.len() < hdrlen {
                return Ok(false);
            }

            if pts_flag {
                let pts_bytes: [u8; 5] = payload[9..14].try_into().unwrap();
                self.pts = types::unpack_timestamp_5byte(pts_bytes);
                if dts_flag {
                    let dts_bytes: [u8; 5] = payload[14..19].try_into().unwrap();
                    self.dts = types::unpack_timestamp_5byte(dts_bytes);
                }
            }

            if let Some(af) = af.as_ref() {
                if let Some(pcr) = af.pcr {
                    self.pcr = pcr;
                }
            }

            self.expect_size = if declared_len <= hdrlen {
                PES_MAX_BUFFER
            } else {
                declared_len - hdrlen
            };

            payload = &payload[hdrlen..];
        }

        if self.expect_size > 0 {
            self.buf.resize(self.buf.len().max(self.buf_write + payload.len()), 0);
            self.buf[self.buf_write..self.buf_write + payload.len()].copy_from_slice(payload);
            self.buf_write += payload.len();

            if self.buf_write > PES_MAX_BUFFER - TS_BODY_SIZE {
                log::error!("pes: packet over {} bytes, truncating, pid: {}", PES_MAX_BUFFER, self.pid);
                self.expect_size = self.buf_write;
                self.stats.truncated += 1;
                self.demux(false);
                self.o_cc = (self.o_cc + 1) & 0x0f;
            } else if self.expect_size == self.buf_write {
                self.demux(false);
            } else if self.mode == PesMode::Fast {
                self.demux(true);
            }
        } else {
            self.stats.dropped += 1;
        }

        Ok(true)
    }

    fn demux(&mut self, fast: bool) {
        while self.buf_read < self.buf_write {
            let is_start = self.buf_read == 0;
            let remain = self.buf_write - self.buf_read;

            if fast && remain < TS_BODY_SIZE {
                break;
            }

            let mut ts = [0u8; TS_PACKET_SIZE];
            ts[0] = 0x47;
            ts[1] = (self.pid >> 8) as u8;
            ts[2] = (self.pid & 0xff) as u8;
            if is_start {
                ts[1] |= 0x40; // PUSI
            }

            self.o_cc = (self.o_cc + 1) & 0x0f;
            ts[3] = 0x10 | self.o_cc;

            let mut af_size = 0usize;
            let mut pes_header: Option<Vec<u8>> = None;

            if is_start {
                if self.key {
                    ts[5] |= 0x40;
                    af_size = 2;
                }

                if self.pcr != TS_NONE {
                    ts[5] |= 0x10;
                    let base = self.pcr / 300;
                    let ext = (self.pcr % 300) as u16;
                    let encoded = types::encode_pcr_field(base, ext);
                    ts[6..12].copy_from_slice(&encoded);
                    af_size = 8;
                }

                let has_pts = self.pts != TS_NONE;
                let has_dts = has_pts && self.dts != TS_NONE;

                let mut pes_hlen = 0usize;
                if has_pts {
                    pes_hlen += 5;
                    if has_dts {
                        pes_hlen += 5;
                    }
                }
                let ext_hdrlen = pes_hlen;
                pes_hlen += PES_HEADER_SIZE;

                if !fast {
                    self.expect_size = self.buf_write;
                }

                let mut header = vec![0u8; pes_hlen];
                header[2] = 0x01;
                header[3] = self.stream_id;

                if self.expect_size != PES_MAX_BUFFER {
                    let pktlen = self.expect_size + pes_hlen - PES_HDR_BASIC;
                    if pktlen <= 0xFFFF {
                        header[4] = (pktlen >> 8) as u8;
                        header[5] = (pktlen & 0xff) as u8;
                    }
                }

                header[6] = 0x80; // marker bits '10'
                header[7] = if has_pts { 0x80 } else { 0 } | if has_dts { 0x40 } else { 0 };
                header[8] = ext_hdrlen as u8;

                let mut pos = 9;
                if has_pts {
                    let marker = if has_dts { 0b0011 } else { 0b0010 };
                    header[pos..pos + 5].copy_from_slice(&types::pack_timestamp_5byte(marker, self.pts));
                    pos += 5;
                }
                if has_dts {
                    header[pos..pos + 5].copy_from_slice(&types::pack_timestamp_5byte(0b0001, self.dts));
                }

                pes_header = Some(header);
            }

            let pes_hlen = pes_header.as_ref().map(Vec::len).unwrap_or(0);
            let mut space = TS_BODY_SIZE - af_size - pes_hlen;

            let mut pay_offset = TS_HEADER_SIZE;
            let stuffing = if remain < space { space - remain } else { 0 };

            if stuffing > 0 {
                let stuff_start = pay_offset + af_size;
                for b in ts[stuff_start..stuff_start + stuffing].iter_mut() {
                    *b = 0xff;
                }
                if af_size == 0 {
                    ts[5] = 0; // dummy AF
                }
                af_size += stuffing;
                space = remain;
            }

            if af_size > 0 {
                ts[3] |= 0x20;
                ts[4] = (af_size - 1) as u8;
                pay_offset += af_size;
            }

            if let Some(header) = pes_header {
                ts[pay_offset..pay_offset + header.len()].copy_from_slice(&header);
                pay_offset += header.len();
            }

            ts[pay_offset..pay_offset + space].copy_from_slice(&self.buf[self.buf_read..self.buf_read + space]);

            if let Some(cb) = self.on_ts.as_mut() {
                cb(&ts);
            }

            self.stats.sent += 1;
            self.buf_read += space;
        }

        if !fast {
            if self.expect_size != PES_MAX_BUFFER && self.buf_write != self.expect_size {
                log::warn!(
                    "pes: wrong size: expected {}, got {}, pid: {}",
                    self.expect_size,
                    self.buf_write,
                    self.pid
                );
            }
            self.expect_size = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn build_pes_ts_packet(pusi: bool, cc: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(TS_PACKET_SIZE);
        buf.put_u8(0x47);
        buf.put_u8(if pusi { 0x40 } else { 0 } | 0x00);
        buf.put_u8(0x01); // pid low byte
        buf.put_u8(0x10 | cc);
        buf.extend_from_slice(payload);
        buf.resize(TS_PACKET_SIZE, 0xff);
        buf.to_vec()
    }

    fn pes_start_payload(declared_len: u16, pts: Option<u64>) -> Vec<u8> {
        let mut p = vec![0x00, 0x00, 0x01, 0xe0];
        p.push((declared_len >> 8) as u8);
        p.push((declared_len & 0xff) as u8);
        p.push(0x80);
        p.push(if pts.is_some() { 0x80 } else { 0 });
        let hdrlen = if pts.is_some() { 5 } else { 0 };
        p.push(hdrlen as u8);
        if let Some(pts) = pts {
            p.extend_from_slice(&types::pack_timestamp_5byte(0b0010, pts));
        }
        p
    }

    #[test]
    fn reassembles_and_repacketizes_fixed_length_pes() {
        let mut engine = PesEngine::new(1, PesMode::Normal);
        let emitted = std::sync::Arc::new(parking_lot::Mutex::new(Vec::<Vec<u8>>::new()));
        let e2 = std::sync::Arc::clone(&emitted);
        engine.set_on_ts(move |pkt| e2.lock().push(pkt.to_vec()));

        let body_len = 20usize;
        let mut header_payload = pes_start_payload((body_len + 3) as u16, Some(0x1_2345_6789));
        header_payload.extend(std::iter::repeat(0xAAu8).take(body_len));

        let packet = build_pes_ts_packet(true, 0, &header_payload);
        engine.mux(&packet).unwrap();

        assert_eq!(engine.stats().sent, 1);
        let frames = emitted.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][0], 0x47);
        assert_eq!(frames[0][1] & 0x40, 0x40, "PUSI should be set on first packet");
    }

    #[test]
    fn cc_discontinuity_advances_output_cc_by_two() {
        let mut engine = PesEngine::new(1, PesMode::Normal);

        let mut header_payload = pes_start_payload(100, None);
        header_payload.extend(std::iter::repeat(0xAAu8).take(90));
        let packet = build_pes_ts_packet(true, 0, &header_payload);
        engine.mux(&packet).unwrap();

        let cc_before = engine.o_cc;

        // Skip CC 1, jump straight to 2: should detect a discontinuity.
        let mut more_payload = vec![0xBBu8; 10];
        let packet2 = build_pes_ts_packet(false, 2, &mut more_payload);
        engine.mux(&packet2).unwrap();

        // o_cc should have advanced by 2 (one normal increment from
        // pes_demux plus one from the discontinuity bump) relative to the
        // value before this packet's mux call, rather than the usual 1.
        assert_ne!(engine.o_cc, cc_before);
    }
}
