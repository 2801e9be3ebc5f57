//! # Sync Buffer (C12)
//!
//! Drives a steady outgoing TS rate from a jittery input. The buffer holds
//! raw TS packet bytes and release them at the configured bitrate,
//! tracking a fill state across four phases: `Empty` (nothing buffered),
//! `Filling` (accumulating, output suspended), `Normal` (fill within the
//! target band, output active), and `Draining` (fill above the high
//! watermark, output runs ahead to bring the buffer back down). A writer
//! that overflows capacity flushes the whole buffer and restarts from
//! `Empty` rather than silently dropping the oldest bytes.
//!
//! Alongside the byte-level pacing API there's a block-accounting view
//! (`stats()`) exposing `enough_blocks`/`low_blocks` thresholds over
//! sync-block-aligned chunks, for callers that reason in blocks rather
//! than bytes or microseconds.

use std::collections::VecDeque;

use log::warn;

use crate::config::SyncBufferOptions;
use crate::ts::types::TS_PACKET_SIZE;

/// Packets per sync block. Chosen well above the "≥ 7" recommendation so
/// block-aligned reads stay comfortably larger than a single TS packet.
pub const BLOCK_PACKETS: usize = 7;
const BLOCK_SIZE: usize = TS_PACKET_SIZE * BLOCK_PACKETS;

/// Seconds of output the buffer is sized to hold at the configured bitrate
/// before `max_mib` kicks in as a hard cap.
const BUFFER_SECS: u64 = 4;

/// Fill-state of a [`SyncBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No bytes buffered.
    Empty,
    /// Accumulating below the normal watermark; output suspended.
    Filling,
    /// Fill within the target band; output active at the configured rate.
    Normal,
    /// Fill above the high watermark; output runs ahead to settle back
    /// down to the normal band.
    Draining,
}

/// Block-accounting statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    /// Configured bitrate, bits/sec.
    pub bitrate: u64,
    /// Capacity, bytes.
    pub size: usize,
    /// Current fill, bytes.
    pub filled: usize,
    /// Bytes wanted to reach the "enough" watermark from the current
    /// fill (0 if already at or above it).
    pub want: usize,
    /// Current fill expressed in whole sync blocks.
    pub num_blocks: usize,
}

/// Activity counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncBufferCounters {
    /// TS packets released downstream.
    pub sent: u64,
    /// Times an overflowing write forced a flush back to `Empty`.
    pub overflow_flushes: u64,
}

/// A bitrate-paced TS packet buffer.
pub struct SyncBuffer {
    state: SyncState,
    bitrate: u64,
    max_size: usize,
    norm: usize,
    high: usize,
    enough_blocks: usize,
    low_blocks: usize,
    data: VecDeque<u8>,
    pending: f64,
    counters: SyncBufferCounters,
}

impl SyncBuffer {
    /// Creates a buffer paced at `bitrate` bits/sec with capacity and
    /// block-accounting thresholds from `options`.
    ///
    /// Capacity is `bitrate/8 · BUFFER_SECS` bytes, i.e. enough to hold a
    /// few seconds of output at the configured rate, clamped to
    /// `options.max_mib` as a hard cap; `norm`/`high` are 25%/75% of that
    /// capacity. A low-bitrate stream gets a correspondingly small buffer
    /// rather than always filling `max_mib` regardless of rate.
    pub fn new(bitrate: u64, options: SyncBufferOptions) -> Self {
        let cap = options.max_mib * 1024 * 1024;
        let rated_size = ((bitrate / 8) * BUFFER_SECS) as usize;
        let max_size = rated_size.min(cap).max(TS_PACKET_SIZE);
        Self {
            state: SyncState::Empty,
            bitrate,
            max_size,
            norm: max_size / 4,
            high: max_size * 3 / 4,
            enough_blocks: options.enough_blocks,
            low_blocks: options.low_blocks,
            data: VecDeque::with_capacity(max_size.min(1 << 20)),
            pending: 0.0,
            counters: SyncBufferCounters::default(),
        }
    }

    /// Current fill-state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Activity counters.
    pub fn counters(&self) -> SyncBufferCounters {
        self.counters
    }

    /// Pushes one 188-byte TS packet. Returns `false` if this write would
    /// exceed capacity, in which case the whole buffer is flushed and the
    /// state resets to `Empty` rather than overwriting existing data.
    pub fn push(&mut self, packet: &[u8]) -> bool {
        debug_assert_eq!(packet.len(), TS_PACKET_SIZE);

        if self.data.len() + packet.len() > self.max_size {
            warn!("sync buffer overflow at {} bytes, flushing", self.data.len());
            self.data.clear();
            self.pending = 0.0;
            self.state = SyncState::Empty;
            self.counters.overflow_flushes += 1;
            return false;
        }

        self.data.extend(packet.iter().copied());
        self.update_state_after_fill();
        true
    }

    /// Only handles the transition a push can cause that `core_loop`
    /// can't observe on its own: `core_loop` skips entirely while
    /// `Empty`/`Filling`, so reaching the `norm` watermark has to be
    /// caught here, as soon as it happens.
    fn update_state_after_fill(&mut self) {
        if matches!(self.state, SyncState::Empty | SyncState::Filling) && self.data.len() >= self.norm {
            self.state = SyncState::Normal;
        }
    }

    /// Advances pacing by `elapsed_us` microseconds and drains as many
    /// whole 188-byte packets as the configured bitrate allows, appending
    /// them (in order) to `out`. No packets are drained while the state
    /// is `Empty` or `Filling`.
    pub fn core_loop(&mut self, elapsed_us: u64, out: &mut Vec<Vec<u8>>) {
        if matches!(self.state, SyncState::Empty | SyncState::Filling) {
            return;
        }

        let fill = self.data.len();
        if self.state == SyncState::Normal && fill >= self.high {
            self.state = SyncState::Draining;
        } else if self.state == SyncState::Draining && fill <= self.high {
            self.state = SyncState::Normal;
        }

        match self.state {
            SyncState::Normal => {
                self.pending += elapsed_us as f64 * self.bitrate as f64 / 8.0 / 1_000_000.0;
            }
            SyncState::Draining => {
                // Drain straight back down to `norm` this tick rather than
                // pacing at the configured rate — the buffer is above the
                // high watermark and needs to shed the excess now.
                self.pending = fill.saturating_sub(self.norm) as f64;
            }
            SyncState::Empty | SyncState::Filling => unreachable!("handled by the early return above"),
        }

        while self.pending >= TS_PACKET_SIZE as f64 && self.data.len() >= TS_PACKET_SIZE {
            let packet: Vec<u8> = self.data.drain(..TS_PACKET_SIZE).collect();
            out.push(packet);
            self.pending -= TS_PACKET_SIZE as f64;
            self.counters.sent += 1;
        }

        if self.data.is_empty() {
            self.pending = 0.0;
            self.state = SyncState::Empty;
        } else if self.data.len() < self.norm {
            self.state = SyncState::Filling;
        }
    }

    /// Block-accounting statistics snapshot.
    pub fn stats(&self) -> BufferStats {
        let enough_bytes = self.enough_blocks * BLOCK_SIZE;
        let filled = self.data.len();
        BufferStats {
            bitrate: self.bitrate,
            size: self.max_size,
            filled,
            want: enough_bytes.saturating_sub(filled),
            num_blocks: filled / BLOCK_SIZE,
        }
    }

    /// Whether the current fill is at or above the "enough" block
    /// threshold.
    pub fn enough(&self) -> bool {
        self.stats().num_blocks >= self.enough_blocks
    }

    /// Whether the current fill is at or below the "low" block
    /// threshold.
    pub fn low(&self) -> bool {
        self.stats().num_blocks <= self.low_blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn null_packet() -> Vec<u8> {
        let mut p = vec![0x47u8, 0x1f, 0xff, 0x10];
        p.resize(TS_PACKET_SIZE, 0xff);
        p
    }

    #[test]
    fn starts_empty_and_transitions_to_normal_at_norm_watermark() {
        let mut buf = SyncBuffer::new(1_000_000, SyncBufferOptions { max_mib: 1, ..Default::default() });
        assert_eq!(buf.state(), SyncState::Empty);

        let norm_packets = (buf.norm / TS_PACKET_SIZE) + 1;
        for _ in 0..norm_packets {
            buf.push(&null_packet());
        }

        assert_eq!(buf.state(), SyncState::Normal);
    }

    #[test]
    fn overflow_flushes_and_returns_to_empty() {
        let mut buf = SyncBuffer::new(1_000_000, SyncBufferOptions { max_mib: 1, ..Default::default() });
        let max_packets = buf.max_size / TS_PACKET_SIZE;
        for _ in 0..max_packets {
            assert!(buf.push(&null_packet()));
        }

        assert!(!buf.push(&null_packet()));
        assert_eq!(buf.state(), SyncState::Empty);
        assert_eq!(buf.counters().overflow_flushes, 1);
    }

    #[test]
    fn paced_drain_releases_packets_proportional_to_bitrate() {
        // 1,000,000 bits/sec => 125,000 bytes/sec => ~665 packets/sec.
        let mut buf = SyncBuffer::new(1_000_000, SyncBufferOptions { max_mib: 1, ..Default::default() });
        let norm_packets = (buf.norm / TS_PACKET_SIZE) + 1;
        for _ in 0..norm_packets {
            buf.push(&null_packet());
        }
        assert_eq!(buf.state(), SyncState::Normal);

        let mut drained = Vec::new();
        buf.core_loop(1_000_000, &mut drained); // one second of pacing
        assert!(!drained.is_empty());
        assert!(drained.len() as i64 - 665 <= 20);
    }

    #[test]
    fn drops_to_filling_then_empty_when_drained_dry() {
        let mut buf = SyncBuffer::new(10_000_000, SyncBufferOptions { max_mib: 1, ..Default::default() });
        buf.push(&null_packet());
        buf.push(&null_packet());
        buf.state = SyncState::Normal; // force output active with minimal fill

        let mut drained = Vec::new();
        buf.core_loop(1_000_000, &mut drained);

        assert_eq!(buf.state(), SyncState::Empty);
    }

    #[test]
    fn draining_snaps_fill_back_down_to_norm_in_one_tick() {
        let mut buf = SyncBuffer::new(1_000, SyncBufferOptions { max_mib: 1, ..Default::default() });
        // Force the buffer above `high` directly rather than pushing
        // thousands of packets to get there; the bitrate is set low so the
        // Normal-state pacing formula alone couldn't explain the drain.
        while buf.data.len() < buf.high {
            buf.push(&null_packet());
        }
        buf.state = SyncState::Normal;

        let mut drained = Vec::new();
        buf.core_loop(1, &mut drained); // 1us: negligible Normal-rate pacing

        assert_eq!(buf.state(), SyncState::Draining);
        assert!(
            !drained.is_empty(),
            "crossing into Draining should drain straight back toward norm this tick, not wait on pacing"
        );
        assert!(buf.data.len() <= buf.norm + TS_PACKET_SIZE);
    }
}
