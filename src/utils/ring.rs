//! # Thread Buffer / Byte Ring (C14)
//!
//! A bounded, mutex-protected byte ring used to hand data from a worker
//! thread back to the main thread without the worker ever touching graph
//! state directly — the same role `asc_thread_buffer_t` plays underneath
//! the sync buffer's paced drain. A write that would overflow the ring is
//! rejected outright rather than overwriting unread data; the caller
//! (mirroring `remux_buffer_push`) is expected to flush and recover.

use parking_lot::Mutex;

struct RingInner {
    data: Vec<u8>,
    capacity: usize,
    read_pos: usize,
    len: usize,
}

impl RingInner {
    fn write(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.capacity - self.len {
            return false;
        }

        let write_pos = (self.read_pos + self.len) % self.capacity;
        let first_chunk = (self.capacity - write_pos).min(bytes.len());
        self.data[write_pos..write_pos + first_chunk].copy_from_slice(&bytes[..first_chunk]);
        if first_chunk < bytes.len() {
            let remainder = bytes.len() - first_chunk;
            self.data[..remainder].copy_from_slice(&bytes[first_chunk..]);
        }

        self.len += bytes.len();
        true
    }

    fn read(&mut self, out: &mut [u8]) -> usize {
        let to_read = out.len().min(self.len);
        let first_chunk = (self.capacity - self.read_pos).min(to_read);
        out[..first_chunk].copy_from_slice(&self.data[self.read_pos..self.read_pos + first_chunk]);
        if first_chunk < to_read {
            let remainder = to_read - first_chunk;
            out[first_chunk..to_read].copy_from_slice(&self.data[..remainder]);
        }

        self.read_pos = (self.read_pos + to_read) % self.capacity;
        self.len -= to_read;
        to_read
    }
}

/// A bounded byte ring safe to share between a worker thread and the main
/// thread.
pub struct ByteRing {
    inner: Mutex<RingInner>,
}

impl ByteRing {
    /// Creates a ring with room for `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RingInner {
                data: vec![0u8; capacity.max(1)],
                capacity: capacity.max(1),
                read_pos: 0,
                len: 0,
            }),
        }
    }

    /// Writes `bytes` into the ring. Returns `true` on success, `false`
    /// if `bytes` wouldn't fit in the remaining capacity — in which case
    /// nothing is written.
    pub fn write(&self, bytes: &[u8]) -> bool {
        self.inner.lock().write(bytes)
    }

    /// Reads up to `out.len()` bytes from the ring into `out`, wrapping
    /// around the backing storage as needed. Returns the number of bytes
    /// actually copied, which is less than `out.len()` only if the ring
    /// held less data than requested.
    pub fn read(&self, out: &mut [u8]) -> usize {
        self.inner.lock().read(out)
    }

    /// Discards all buffered data without reading it.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        inner.read_pos = 0;
        inner.len = 0;
    }

    /// Bytes currently buffered.
    pub fn count(&self) -> usize {
        self.inner.lock().len
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }
}
