//! Receive buffer for accumulating partial socket reads.

use bytes::{Bytes, BytesMut};

use crate::constants::BUF_CHUNK;

/// Growable byte buffer with pattern search that resumes where it left off.
///
/// Bytes are consumed from the front with `split_to`, so extracting a frame
/// never copies the remainder.
#[derive(Debug)]
pub(crate) struct EslBuffer {
    data: BytesMut,
    /// Offset up to which the buffer is known not to contain the pattern
    /// currently being searched for.
    scanned: usize,
}

impl EslBuffer {
    pub(crate) fn new() -> Self {
        Self {
            data: BytesMut::with_capacity(BUF_CHUNK),
            scanned: 0,
        }
    }

    pub(crate) fn extend_from_slice(&mut self, bytes: &[u8]) {
        if self
            .data
            .capacity()
            - self
                .data
                .len()
            < bytes.len()
        {
            self.data
                .reserve(bytes.len().max(BUF_CHUNK));
        }
        self.data
            .extend_from_slice(bytes);
    }

    pub(crate) fn len(&self) -> usize {
        self.data
            .len()
    }

    /// Remove and return everything before `pattern`, consuming the pattern too.
    ///
    /// Returns `None` when the pattern is not in the buffer yet.
    pub(crate) fn extract_until_pattern(&mut self, pattern: &[u8]) -> Option<Bytes> {
        // Back up so a pattern split across two reads is still found.
        let start = self
            .scanned
            .saturating_sub(pattern.len() - 1);
        let found = self.data[start..]
            .windows(pattern.len())
            .position(|w| w == pattern)
            .map(|pos| start + pos);

        match found {
            Some(pos) => {
                let head = self
                    .data
                    .split_to(pos)
                    .freeze();
                let _ = self
                    .data
                    .split_to(pattern.len());
                self.scanned = 0;
                Some(head)
            }
            None => {
                self.scanned = self
                    .data
                    .len();
                None
            }
        }
    }

    /// Remove and return exactly `len` bytes, or `None` if fewer are buffered.
    pub(crate) fn extract_bytes(&mut self, len: usize) -> Option<Bytes> {
        if self
            .data
            .len()
            < len
        {
            return None;
        }
        self.scanned = 0;
        Some(
            self.data
                .split_to(len)
                .freeze(),
        )
    }
}
