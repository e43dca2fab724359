//! Sample delay line backing the echo reference history.
//!
//! Provides a fixed-capacity ring of `f32` samples with:
//! - Capacity rounded up to a power of two (index arithmetic is a bitmask)
//! - Read-at-age access: offset 0 is the most recently written sample
//! - Block reads returning a time-reversed window of the history
//!
//! The adaptive filter walks this history sample by sample in its inner
//! loop, so single-sample reads are O(1) and never allocate.

#![deny(unsafe_code)]

use std::num::NonZero;

/// Error returned by checked reads when the requested offset does not fit
/// in the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfRange {
    /// The offending offset (for block reads, the last sample's age).
    pub offset: usize,
    /// Capacity of the delay line the read was issued against.
    pub capacity: usize,
}

impl std::fmt::Display for OutOfRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "read offset {} out of range for delay line of capacity {}",
            self.offset, self.capacity
        )
    }
}

impl std::error::Error for OutOfRange {}

/// A fixed-capacity circular sample buffer addressed by sample age.
///
/// Writes advance an internal cursor one sample at a time; reads are
/// expressed as "the sample written `offset` samples ago". The capacity is
/// rounded up to the next power of two so that wrapping is a single mask.
///
/// Unchecked reads clamp out-of-range offsets to the oldest retained sample;
/// callers that need to detect the condition use [`checked_read`]
/// (Self::checked_read) or validate their worst-case offset once per block.
#[derive(Debug, Clone)]
pub struct DelayLine {
    data: Vec<f32>,
    mask: usize,
    write_index: usize,
}

impl DelayLine {
    /// Creates a delay line holding at least `min_capacity` samples, zeroed.
    pub fn new(min_capacity: NonZero<usize>) -> Self {
        let capacity = min_capacity.get().next_power_of_two();
        Self {
            data: vec![0.0; capacity],
            mask: capacity - 1,
            write_index: 0,
        }
    }

    /// Returns the actual (power-of-two) capacity in samples.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Appends one sample, overwriting the oldest retained sample.
    #[inline]
    pub fn write(&mut self, sample: f32) {
        self.data[self.write_index] = sample;
        self.write_index = (self.write_index + 1) & self.mask;
    }

    /// Appends a block of samples in order; `src[src.len() - 1]` becomes the
    /// most recent sample.
    pub fn write_block(&mut self, src: &[f32]) {
        debug_assert!(src.len() <= self.capacity());
        for &sample in src {
            self.write(sample);
        }
    }

    /// Returns the sample written `offset` samples ago (0 = most recent).
    ///
    /// Offsets at or beyond the capacity are clamped to the oldest retained
    /// sample.
    #[inline]
    pub fn read(&self, offset: usize) -> f32 {
        debug_assert!(offset < self.capacity());
        let offset = offset.min(self.mask);
        self.data[(self.write_index.wrapping_sub(1 + offset)) & self.mask]
    }

    /// Like [`read`](Self::read), but fails instead of clamping.
    pub fn checked_read(&self, offset: usize) -> Result<f32, OutOfRange> {
        if offset >= self.capacity() {
            return Err(OutOfRange {
                offset,
                capacity: self.capacity(),
            });
        }
        Ok(self.read(offset))
    }

    /// Fills `dst` with a time-reversed window of the history:
    /// `dst[i]` is the sample written `offset + i` samples ago.
    ///
    /// Fails when the oldest requested sample would not fit in the buffer.
    pub fn read_block(&self, dst: &mut [f32], offset: usize) -> Result<(), OutOfRange> {
        let last = offset + dst.len();
        if last > self.capacity() {
            return Err(OutOfRange {
                offset: last - 1,
                capacity: self.capacity(),
            });
        }
        for (i, out) in dst.iter_mut().enumerate() {
            *out = self.read(offset + i);
        }
        Ok(())
    }

    /// Zeroes the history and resets the write cursor.
    pub fn clear(&mut self) {
        self.data.fill(0.0);
        self.write_index = 0;
    }
}
