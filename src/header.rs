//! Bounded, incrementally grown buffer for the request header line

use crate::protocol::{header_limits, HeaderError};

/// Owned header accumulator. `buf.len()` is the capacity handed to reads;
/// `filled` counts the bytes actually received.
#[derive(Debug)]
pub struct HeaderBuffer {
    buf: Vec<u8>,
    filled: usize,
    max: usize,
}

impl HeaderBuffer {
    pub fn new() -> Self {
        HeaderBuffer {
            buf: vec![0u8; header_limits::INITIAL],
            filled: 0,
            max: header_limits::MAX,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    /// Make sure at least `SLACK` bytes are free, growing by `GROWTH` when
    /// they are not. Growth past the hard maximum is an error; capacity is
    /// never shrunk here.
    pub fn reserve_slack(&mut self) -> Result<(), HeaderError> {
        if self.capacity() - self.filled >= header_limits::SLACK {
            return Ok(());
        }
        let target = self.capacity() + header_limits::GROWTH;
        if target > self.max {
            return Err(HeaderError::TooLarge { limit: self.max });
        }
        self.buf
            .try_reserve_exact(target - self.buf.len())
            .map_err(|_| HeaderError::Alloc)?;
        self.buf.resize(target, 0);
        Ok(())
    }

    /// Free region a read may fill.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.filled..]
    }

    /// Record `n` bytes written into `spare_mut()`.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.filled + n <= self.buf.len());
        self.filled = (self.filled + n).min(self.buf.len());
    }
}

impl Default for HeaderBuffer {
    fn default() -> Self {
        Self::new()
    }
}
