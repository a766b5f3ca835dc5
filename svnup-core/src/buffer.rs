//! Response accumulator.
//!
//! A growable byte buffer that collects everything the server sends during
//! one exchange. Capacity is counted in `BUFFER_UNIT` blocks and grows by
//! half of its current size whenever a write would not fit. Callers keep
//! positions into the buffer as plain offsets, so growth never invalidates
//! them.

use std::io;
use std::ops::Range;

/// Allocation unit of the accumulator.
pub const BUFFER_UNIT: usize = 4096;

const INITIAL_BLOCKS: usize = 16;

/// Growable buffer holding the raw bytes of the current exchange.
#[derive(Debug)]
pub struct ResponseBuffer {
    data: Vec<u8>,
    len: usize,
    blocks: usize,
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self {
            data: vec![0; INITIAL_BLOCKS * BUFFER_UNIT],
            len: 0,
            blocks: INITIAL_BLOCKS,
        }
    }

    /// Logical length (bytes received so far).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Make sure `projected` bytes fit, growing by half the current block
    /// count until they do.
    pub fn reserve_total(&mut self, projected: usize) {
        if projected < self.blocks * BUFFER_UNIT {
            return;
        }
        while projected >= self.blocks * BUFFER_UNIT {
            self.blocks += (self.blocks / 2).max(1);
        }
        self.data.resize(self.blocks * BUFFER_UNIT, 0);
    }

    /// Append bytes to the logical end of the buffer.
    pub fn append(&mut self, bytes: &[u8]) {
        self.reserve_total(self.len + bytes.len());
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    /// Let `read` fill the spare capacity (at least one unit) and extend the
    /// logical length by what it reports.
    pub fn fill_from<F>(&mut self, read: F) -> io::Result<usize>
    where
        F: FnOnce(&mut [u8]) -> io::Result<usize>,
    {
        self.reserve_total(self.len + BUFFER_UNIT);
        let n = read(&mut self.data[self.len..])?;
        self.len += n;
        Ok(n)
    }

    /// Forget the current content but keep the allocation.
    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Zero every byte ever written and reset the length.
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.len = 0;
    }

    /// Remove `range` in place, shifting the following bytes left.
    pub fn splice_out(&mut self, range: Range<usize>) {
        let Range { start, end } = range;
        debug_assert!(start <= end && end <= self.len);
        self.data.copy_within(end..self.len, start);
        let removed = end - start;
        let new_len = self.len - removed;
        self.data[new_len..self.len].fill(0);
        self.len = new_len;
    }

    /// Overwrite an already consumed region with zeros.
    pub fn zero(&mut self, range: Range<usize>) {
        let end = range.end.min(self.len);
        if range.start < end {
            self.data[range.start..end].fill(0);
        }
    }
}
