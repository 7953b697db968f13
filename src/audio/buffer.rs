//! Fixed-capacity byte FIFO carrying loopback audio from playback to capture

/// Whole-operation ring buffer
///
/// Single producer (the playback period tick) and single consumer (the
/// capture period tick). Not synchronized on its own: the owning
/// [`DeviceContext`](crate::audio::DeviceContext) serializes access behind
/// one lock. Writes and reads are accepted or rejected as a whole so frame
/// interleaving is never torn.
pub struct RingBuffer {
    buffer: Box<[u8]>,
    write_pos: usize,
    read_pos: usize,
    filled: usize,
    overflows: u64,
    underruns: u64,
}

/// Point-in-time view of ring occupancy and glitch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub capacity: usize,
    pub filled: usize,
    pub overflows: u64,
    pub underruns: u64,
}

impl RingBuffer {
    /// Create a ring buffer with exactly `capacity` bytes
    ///
    /// Returns `None` if the allocation cannot be satisfied or the
    /// capacity is zero.
    pub fn try_new(capacity: usize) -> Option<Self> {
        if capacity == 0 {
            return None;
        }

        let mut storage = Vec::new();
        storage.try_reserve_exact(capacity).ok()?;
        storage.resize(capacity, 0u8);

        Some(Self {
            buffer: storage.into_boxed_slice(),
            write_pos: 0,
            read_pos: 0,
            filled: 0,
            overflows: 0,
            underruns: 0,
        })
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes currently queued
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Free space in bytes
    pub fn free(&self) -> usize {
        self.capacity() - self.filled
    }

    /// Current write offset
    pub fn write_position(&self) -> usize {
        self.write_pos
    }

    /// Current read offset
    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    /// Append `data` to the FIFO
    ///
    /// If there is not room for all of it, nothing is written and the
    /// overflow counter is bumped. Returns whether the write was accepted.
    pub fn push(&mut self, data: &[u8]) -> bool {
        if data.is_empty() {
            return true;
        }
        if self.free() < data.len() {
            self.overflows += 1;
            return false;
        }

        let capacity = self.capacity();
        let first = data.len().min(capacity - self.write_pos);
        self.buffer[self.write_pos..self.write_pos + first].copy_from_slice(&data[..first]);
        self.buffer[..data.len() - first].copy_from_slice(&data[first..]);

        self.write_pos = (self.write_pos + data.len()) % capacity;
        self.filled += data.len();
        true
    }

    /// Fill `out` entirely from the FIFO
    ///
    /// If fewer than `out.len()` bytes are queued, `out` is zeroed, the
    /// read side is left untouched and the underrun counter is bumped.
    /// Returns whether real data was delivered.
    pub fn pop(&mut self, out: &mut [u8]) -> bool {
        if out.is_empty() {
            return true;
        }
        if self.filled < out.len() {
            out.fill(0);
            self.underruns += 1;
            return false;
        }

        let capacity = self.capacity();
        let len = out.len();
        let first = len.min(capacity - self.read_pos);
        out[..first].copy_from_slice(&self.buffer[self.read_pos..self.read_pos + first]);
        out[first..].copy_from_slice(&self.buffer[..len - first]);

        self.read_pos = (self.read_pos + len) % capacity;
        self.filled -= len;
        true
    }

    /// Drop all queued bytes and rewind both offsets
    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.read_pos = 0;
        self.filled = 0;
    }

    /// Snapshot occupancy and counters
    pub fn stats(&self) -> RingStats {
        RingStats {
            capacity: self.capacity(),
            filled: self.filled,
            overflows: self.overflows,
            underruns: self.underruns,
        }
    }
}
